use llgraph_result::RowIntegrityError;

/// What the loader does with a row that failed an integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFailureAction {
    /// Drop the row, record a warning and keep going.
    Skip,
    /// Fail the statement and discard everything staged so far.
    Abort,
}

/// The single decision point between skip-with-warning and abort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorPolicy {
    ignore_errors: bool,
}

impl ErrorPolicy {
    pub fn new(ignore_errors: bool) -> Self {
        Self { ignore_errors }
    }

    pub fn ignore_errors(&self) -> bool {
        self.ignore_errors
    }

    pub fn on_row_failure(&self, _failure: &RowIntegrityError) -> RowFailureAction {
        if self.ignore_errors {
            RowFailureAction::Skip
        } else {
            RowFailureAction::Abort
        }
    }
}
