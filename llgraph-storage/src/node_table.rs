//! Persisted node tables.
//!
//! Committed rows live in an immutable [`NodeTableData`] snapshot behind an
//! `RwLock<Arc<_>>`. Readers clone the `Arc` and never observe a half-applied
//! write. A [`NodeTableWriter`] stages rows against the snapshot it started
//! from and publishes a new snapshot in one swap on [`NodeTableWriter::commit`].
//! Dropping a writer without committing discards everything it staged.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use arrow::array::{ArrayRef, BooleanArray, BooleanBuilder};
use arrow::compute::filter;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llgraph_result::{Error, Result, RowIntegrityError};
use llgraph_types::{
    ColumnDescriptor, KeyValue, LogicalType, MAX_NODE_OFFSET, NodeKeyLookup, TableId, key_at,
    storage_schema,
};
use rustc_hash::FxHashMap;

use crate::lease::WriterLease;
use crate::{AppendOutcome, RowFailure};

/// Immutable committed state of a node table.
#[derive(Debug, Default)]
pub struct NodeTableData {
    batches: Vec<RecordBatch>,
    pk_index: FxHashMap<KeyValue, u64>,
    num_rows: u64,
}

impl NodeTableData {
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn offset_of(&self, key: &KeyValue) -> Option<u64> {
        self.pk_index.get(key).copied()
    }
}

pub struct NodeTable {
    table_id: TableId,
    name: String,
    columns: Vec<ColumnDescriptor>,
    primary_key: usize,
    schema: SchemaRef,
    committed: RwLock<Arc<NodeTableData>>,
    writer_active: Arc<AtomicBool>,
}

impl std::fmt::Debug for NodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTable")
            .field("table_id", &self.table_id)
            .field("name", &self.name)
            .field("primary_key", &self.columns[self.primary_key].name)
            .finish()
    }
}

impl NodeTable {
    pub(crate) fn new(
        table_id: TableId,
        name: String,
        columns: Vec<ColumnDescriptor>,
        primary_key: usize,
    ) -> Self {
        let schema = storage_schema(&[], &columns);
        Self {
            table_id,
            name,
            columns,
            primary_key,
            schema,
            committed: RwLock::new(Arc::new(NodeTableData::default())),
            writer_active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn primary_key_index(&self) -> usize {
        self.primary_key
    }

    pub fn primary_key(&self) -> &ColumnDescriptor {
        &self.columns[self.primary_key]
    }

    /// Storage schema of the property columns, without `_id`.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Current committed state.
    pub fn data(&self) -> Result<Arc<NodeTableData>> {
        let guard = self
            .committed
            .read()
            .map_err(|_| Error::Internal("Failed to acquire node table read lock".to_string()))?;
        Ok(Arc::clone(&guard))
    }

    pub fn num_rows(&self) -> Result<u64> {
        Ok(self.data()?.num_rows)
    }

    /// Point-in-time view usable as a key lookup.
    pub fn snapshot(&self) -> Result<NodeTableSnapshot> {
        Ok(NodeTableSnapshot {
            table_id: self.table_id,
            name: self.name.clone(),
            primary_key_type: self.primary_key().logical_type,
            data: self.data()?,
        })
    }

    /// Take the writer lease and start staging rows.
    ///
    /// Fails with [`Error::TransactionContextError`] while another writer is
    /// active on this table.
    pub fn begin_write(self: &Arc<Self>) -> Result<NodeTableWriter> {
        let lease = WriterLease::acquire(&self.writer_active, &self.name)?;
        let base = self.data()?;
        tracing::trace!(
            "[STORAGE] begin write on node table '{}' at {} rows",
            self.name,
            base.num_rows
        );
        Ok(NodeTableWriter {
            table: Arc::clone(self),
            _lease: lease,
            base,
            staged: Vec::new(),
            staged_keys: FxHashMap::default(),
            staged_rows: 0,
        })
    }
}

impl NodeKeyLookup for NodeTable {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn table_name(&self) -> &str {
        &self.name
    }

    fn primary_key_type(&self) -> LogicalType {
        self.primary_key().logical_type
    }

    fn lookup_offset(&self, key: &KeyValue) -> Option<u64> {
        self.data().ok()?.offset_of(key)
    }
}

/// Committed state of a node table pinned at one point in time.
#[derive(Debug, Clone)]
pub struct NodeTableSnapshot {
    table_id: TableId,
    name: String,
    primary_key_type: LogicalType,
    data: Arc<NodeTableData>,
}

impl NodeTableSnapshot {
    pub fn data(&self) -> &NodeTableData {
        &self.data
    }
}

impl NodeKeyLookup for NodeTableSnapshot {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn table_name(&self) -> &str {
        &self.name
    }

    fn primary_key_type(&self) -> LogicalType {
        self.primary_key_type
    }

    fn lookup_offset(&self, key: &KeyValue) -> Option<u64> {
        self.data.offset_of(key)
    }
}

/// Staged, uncommitted rows for one node table.
pub struct NodeTableWriter {
    table: Arc<NodeTable>,
    _lease: WriterLease,
    base: Arc<NodeTableData>,
    staged: Vec<RecordBatch>,
    staged_keys: FxHashMap<KeyValue, u64>,
    staged_rows: u64,
}

impl NodeTableWriter {
    pub fn table(&self) -> &Arc<NodeTable> {
        &self.table
    }

    pub fn staged_rows(&self) -> u64 {
        self.staged_rows
    }

    /// Check and stage one batch of columns in table order.
    ///
    /// Columns must already use the storage types of the table. Every row with
    /// a null or duplicate primary key is reported to `on_failure`; returning
    /// an error from it aborts the append and leaves this writer unusable for
    /// commit.
    pub fn append(
        &mut self,
        columns: &[ArrayRef],
        on_failure: &mut dyn FnMut(RowFailure) -> Result<()>,
    ) -> Result<AppendOutcome> {
        if columns.len() != self.table.columns.len() {
            return Err(Error::InvalidArgumentError(format!(
                "node table '{}' expects {} columns, got {}",
                self.table.name,
                self.table.columns.len(),
                columns.len()
            )));
        }
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        let keys = &columns[self.table.primary_key];
        let mut keep = BooleanBuilder::with_capacity(num_rows);
        let mut outcome = AppendOutcome::default();

        for row in 0..num_rows {
            let verdict = match key_at(keys, row)? {
                None => Err(RowIntegrityError::NullPrimaryKey),
                Some(key)
                    if self.base.pk_index.contains_key(&key)
                        || self.staged_keys.contains_key(&key) =>
                {
                    Err(RowIntegrityError::DuplicatePrimaryKey {
                        key: key.to_string(),
                    })
                }
                Some(key) => Ok(key),
            };
            match verdict {
                Ok(key) => {
                    let offset = self.base.num_rows + self.staged_rows + outcome.accepted as u64;
                    if offset > MAX_NODE_OFFSET {
                        return Err(Error::Internal(format!(
                            "node table '{}' is full",
                            self.table.name
                        )));
                    }
                    self.staged_keys.insert(key, offset);
                    outcome.accepted += 1;
                    keep.append_value(true);
                }
                Err(error) => {
                    on_failure(RowFailure { row, error })?;
                    outcome.rejected += 1;
                    keep.append_value(false);
                }
            }
        }

        if outcome.accepted > 0 {
            let batch = if outcome.rejected == 0 {
                RecordBatch::try_new(self.table.schema(), columns.to_vec())?
            } else {
                let mask = keep.finish();
                RecordBatch::try_new(self.table.schema(), filter_columns(columns, &mask)?)?
            };
            self.staged.push(batch);
            self.staged_rows += outcome.accepted as u64;
        }
        Ok(outcome)
    }

    /// Publish every staged row at once.
    pub fn commit(self) -> Result<u64> {
        let mut batches = self.base.batches.clone();
        batches.extend(self.staged);
        let mut pk_index = self.base.pk_index.clone();
        pk_index.extend(self.staged_keys);
        let data = NodeTableData {
            batches,
            pk_index,
            num_rows: self.base.num_rows + self.staged_rows,
        };

        let mut guard = self
            .table
            .committed
            .write()
            .map_err(|_| Error::Internal("Failed to acquire node table write lock".to_string()))?;
        *guard = Arc::new(data);
        tracing::debug!(
            "[STORAGE] committed {} rows into node table '{}'",
            self.staged_rows,
            self.table.name
        );
        Ok(self.staged_rows)
    }
}

pub(crate) fn filter_columns(columns: &[ArrayRef], mask: &BooleanArray) -> Result<Vec<ArrayRef>> {
    columns
        .iter()
        .map(|col| filter(col.as_ref(), mask).map_err(Error::from))
        .collect()
}
