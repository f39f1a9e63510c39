//! Per-connection warning accumulator.
//!
//! Warnings are scoped to the most recent statement that produced one: the
//! first warning appended under a new statement id replaces the previous
//! set. Statements that produce no warnings leave the previous set visible.

/// Default bound on retained warnings per statement.
pub const DEFAULT_WARNING_LIMIT: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub statement_id: u64,
    /// 1-based position within the statement.
    pub sequence: u64,
    pub message: String,
    /// Row index within the copy source, when known.
    pub source_row: Option<u64>,
}

#[derive(Debug)]
pub struct WarningSink {
    limit: usize,
    statement_id: Option<u64>,
    entries: Vec<Warning>,
    dropped: u64,
}

impl Default for WarningSink {
    fn default() -> Self {
        Self::new(DEFAULT_WARNING_LIMIT)
    }
}

impl WarningSink {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            statement_id: None,
            entries: Vec::new(),
            dropped: 0,
        }
    }

    /// Record a warning. Returns `false` if it was dropped because the
    /// statement already reached the limit.
    pub fn append(
        &mut self,
        statement_id: u64,
        message: impl Into<String>,
        source_row: Option<u64>,
    ) -> bool {
        if self.statement_id != Some(statement_id) {
            self.entries.clear();
            self.dropped = 0;
            self.statement_id = Some(statement_id);
        }
        if self.entries.len() >= self.limit {
            self.dropped += 1;
            if self.dropped == 1 {
                tracing::warn!(
                    "[COPY] statement {statement_id} exceeded the warning limit of {}; further warnings are dropped",
                    self.limit
                );
            }
            return false;
        }
        let sequence = self.entries.len() as u64 + 1;
        self.entries.push(Warning {
            statement_id,
            sequence,
            message: message.into(),
            source_row,
        });
        true
    }

    /// Sequence numbers and messages of the current set. The set is kept.
    pub fn drain(&self) -> Vec<(u64, String)> {
        self.entries
            .iter()
            .map(|w| (w.sequence, w.message.clone()))
            .collect()
    }

    pub fn entries(&self) -> &[Warning] {
        &self.entries
    }

    /// Warnings of the current statement that did not fit under the limit.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped = 0;
        self.statement_id = None;
    }
}
