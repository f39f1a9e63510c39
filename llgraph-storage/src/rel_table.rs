//! Persisted relationship tables.
//!
//! A relationship table stores resolved endpoint [`NodeId`]s (`_src`, `_dst`)
//! followed by its property columns. Endpoints are resolved against the
//! committed primary-key index of the node tables named by the selected
//! `(FROM, TO)` pair when rows are appended.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use arrow::array::{ArrayRef, BooleanBuilder, UInt64Builder};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llgraph_result::{Error, Result, RowIntegrityError};
use llgraph_types::{
    ColumnDescriptor, DST_ID_COLUMN, NodeId, NodeKeyLookup, SRC_ID_COLUMN, TableId, key_at,
    storage_schema,
};

use crate::lease::WriterLease;
use crate::node_table::{NodeTable, NodeTableSnapshot, filter_columns};
use crate::{AppendOutcome, RowFailure};

/// One `(FROM, TO)` node table pair of a relationship table.
#[derive(Debug, Clone)]
pub struct RelPair {
    pub from: Arc<NodeTable>,
    pub to: Arc<NodeTable>,
}

#[derive(Debug, Default)]
pub struct RelTableData {
    batches: Vec<RecordBatch>,
    num_rows: u64,
}

impl RelTableData {
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }
}

#[derive(Debug)]
pub struct RelTable {
    table_id: TableId,
    name: String,
    pairs: Vec<RelPair>,
    properties: Vec<ColumnDescriptor>,
    schema: SchemaRef,
    committed: RwLock<Arc<RelTableData>>,
    writer_active: Arc<AtomicBool>,
}

impl RelTable {
    pub(crate) fn new(
        table_id: TableId,
        name: String,
        pairs: Vec<RelPair>,
        properties: Vec<ColumnDescriptor>,
    ) -> Self {
        let schema = storage_schema(&[SRC_ID_COLUMN, DST_ID_COLUMN], &properties);
        Self {
            table_id,
            name,
            pairs,
            properties,
            schema,
            committed: RwLock::new(Arc::new(RelTableData::default())),
            writer_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pairs(&self) -> &[RelPair] {
        &self.pairs
    }

    pub fn properties(&self) -> &[ColumnDescriptor] {
        &self.properties
    }

    /// Storage schema: `_src`, `_dst`, then properties.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Index of the pair connecting `from` to `to`.
    pub fn pair_index(&self, from: &str, to: &str) -> Option<usize> {
        self.pairs
            .iter()
            .position(|p| p.from.name() == from && p.to.name() == to)
    }

    pub fn data(&self) -> Result<Arc<RelTableData>> {
        let guard = self.committed.read().map_err(|_| {
            Error::Internal("Failed to acquire relationship table read lock".to_string())
        })?;
        Ok(Arc::clone(&guard))
    }

    pub fn num_rows(&self) -> Result<u64> {
        Ok(self.data()?.num_rows)
    }

    /// Take the writer lease for rows of the pair at `pair`.
    pub fn begin_write(self: &Arc<Self>, pair: usize) -> Result<RelTableWriter> {
        let selected = self.pairs.get(pair).ok_or_else(|| {
            Error::InvalidArgumentError(format!(
                "relationship table '{}' has no pair {pair}",
                self.name
            ))
        })?;
        let lease = WriterLease::acquire(&self.writer_active, &self.name)?;
        let from = selected.from.snapshot()?;
        let to = selected.to.snapshot()?;
        let base = self.data()?;
        tracing::trace!(
            "[STORAGE] begin write on relationship table '{}' ({} -> {})",
            self.name,
            from.table_name(),
            to.table_name()
        );
        Ok(RelTableWriter {
            table: Arc::clone(self),
            _lease: lease,
            from,
            to,
            base,
            staged: Vec::new(),
            staged_rows: 0,
        })
    }
}

/// Staged, uncommitted relationship rows.
pub struct RelTableWriter {
    table: Arc<RelTable>,
    _lease: WriterLease,
    from: NodeTableSnapshot,
    to: NodeTableSnapshot,
    base: Arc<RelTableData>,
    staged: Vec<RecordBatch>,
    staged_rows: u64,
}

impl RelTableWriter {
    pub fn table(&self) -> &Arc<RelTable> {
        &self.table
    }

    pub fn from_table(&self) -> &NodeTableSnapshot {
        &self.from
    }

    pub fn to_table(&self) -> &NodeTableSnapshot {
        &self.to
    }

    pub fn staged_rows(&self) -> u64 {
        self.staged_rows
    }

    /// Resolve endpoint keys and stage the matching rows.
    ///
    /// `properties` must be in table order and already use storage types.
    /// Null or unknown endpoint keys are reported to `on_failure`.
    pub fn append(
        &mut self,
        src_keys: &ArrayRef,
        dst_keys: &ArrayRef,
        properties: &[ArrayRef],
        on_failure: &mut dyn FnMut(RowFailure) -> Result<()>,
    ) -> Result<AppendOutcome> {
        if properties.len() != self.table.properties.len() {
            return Err(Error::InvalidArgumentError(format!(
                "relationship table '{}' expects {} properties, got {}",
                self.table.name,
                self.table.properties.len(),
                properties.len()
            )));
        }
        let num_rows = src_keys.len();
        let mut src_ids = UInt64Builder::with_capacity(num_rows);
        let mut dst_ids = UInt64Builder::with_capacity(num_rows);
        let mut keep = BooleanBuilder::with_capacity(num_rows);
        let mut outcome = AppendOutcome::default();

        for row in 0..num_rows {
            let resolved = match resolve(&self.from, src_keys, row, "from")? {
                Ok(src) => resolve(&self.to, dst_keys, row, "to")?.map(|dst| (src, dst)),
                Err(error) => Err(error),
            };
            match resolved {
                Ok((src, dst)) => {
                    src_ids.append_value(src.as_u64());
                    dst_ids.append_value(dst.as_u64());
                    keep.append_value(true);
                    outcome.accepted += 1;
                }
                Err(error) => {
                    on_failure(RowFailure { row, error })?;
                    keep.append_value(false);
                    outcome.rejected += 1;
                }
            }
        }

        if outcome.accepted > 0 {
            let mut columns: Vec<ArrayRef> = vec![
                Arc::new(src_ids.finish()) as ArrayRef,
                Arc::new(dst_ids.finish()) as ArrayRef,
            ];
            if outcome.rejected == 0 {
                columns.extend(properties.iter().cloned());
            } else {
                columns.extend(filter_columns(properties, &keep.finish())?);
            }
            self.staged
                .push(RecordBatch::try_new(self.table.schema(), columns)?);
            self.staged_rows += outcome.accepted as u64;
        }
        Ok(outcome)
    }

    pub fn commit(self) -> Result<u64> {
        let mut batches = self.base.batches.clone();
        batches.extend(self.staged);
        let data = RelTableData {
            batches,
            num_rows: self.base.num_rows + self.staged_rows,
        };
        let mut guard = self.table.committed.write().map_err(|_| {
            Error::Internal("Failed to acquire relationship table write lock".to_string())
        })?;
        *guard = Arc::new(data);
        tracing::debug!(
            "[STORAGE] committed {} rows into relationship table '{}'",
            self.staged_rows,
            self.table.name
        );
        Ok(self.staged_rows)
    }
}

/// Outer `Result` carries hard failures, the inner one row-level failures.
fn resolve(
    table: &NodeTableSnapshot,
    keys: &ArrayRef,
    row: usize,
    endpoint: &str,
) -> Result<std::result::Result<NodeId, RowIntegrityError>> {
    let Some(key) = key_at(keys, row)? else {
        return Ok(Err(RowIntegrityError::NullEndpoint {
            endpoint: endpoint.to_string(),
        }));
    };
    Ok(match table.lookup_offset(&key) {
        Some(offset) => Ok(NodeId::from_parts(table.table_id(), offset)),
        None => Err(RowIntegrityError::UnresolvedEndpoint {
            key: key.to_string(),
        }),
    })
}
