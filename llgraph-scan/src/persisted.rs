//! Scans over persisted node and relationship tables.
//!
//! A scan pins the committed snapshot at open time, so a copy committing
//! while the scan runs is not observed.

use std::sync::Arc;

use arrow::array::{ArrayRef, UInt64Array};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llgraph_result::Result;
use llgraph_storage::{NodeTable, RelTable};
use llgraph_types::{INTERNAL_ID_COLUMN, NodeId, TableId, storage_schema};

use crate::{BoxedRowIterator, RowBatchIterator, ScanOptions, ScanSource};

pub struct PersistedNodeScan {
    table: Arc<NodeTable>,
    schema: SchemaRef,
}

impl PersistedNodeScan {
    pub fn new(table: Arc<NodeTable>) -> Self {
        let schema = storage_schema(&[INTERNAL_ID_COLUMN], table.columns());
        Self { table, schema }
    }
}

impl ScanSource for PersistedNodeScan {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn open_scan(&self, options: &ScanOptions) -> Result<BoxedRowIterator> {
        let data = self.table.data()?;
        tracing::trace!(
            "[SCAN] node table '{}' at {} rows",
            self.table.name(),
            data.num_rows()
        );
        Ok(Box::new(ChunkedScan {
            schema: self.schema(),
            batches: data.batches().to_vec(),
            batch_idx: 0,
            row_in_batch: 0,
            next_offset: 0,
            batch_size: options.batch_size.max(1),
            node_ids: Some(self.table.table_id()),
        }))
    }
}

pub struct PersistedRelScan {
    table: Arc<RelTable>,
}

impl PersistedRelScan {
    pub fn new(table: Arc<RelTable>) -> Self {
        Self { table }
    }
}

impl ScanSource for PersistedRelScan {
    fn schema(&self) -> SchemaRef {
        self.table.schema()
    }

    fn open_scan(&self, options: &ScanOptions) -> Result<BoxedRowIterator> {
        let data = self.table.data()?;
        tracing::trace!(
            "[SCAN] relationship table '{}' at {} rows",
            self.table.name(),
            data.num_rows()
        );
        Ok(Box::new(ChunkedScan {
            schema: self.table.schema(),
            batches: data.batches().to_vec(),
            batch_idx: 0,
            row_in_batch: 0,
            next_offset: 0,
            batch_size: options.batch_size.max(1),
            node_ids: None,
        }))
    }
}

/// Re-chunks committed batches; prepends `_id` when `node_ids` is set.
struct ChunkedScan {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    batch_idx: usize,
    row_in_batch: usize,
    next_offset: u64,
    batch_size: usize,
    node_ids: Option<TableId>,
}

impl RowBatchIterator for ChunkedScan {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        loop {
            let Some(batch) = self.batches.get(self.batch_idx) else {
                return Ok(None);
            };
            if self.row_in_batch >= batch.num_rows() {
                self.batch_idx += 1;
                self.row_in_batch = 0;
                continue;
            }
            let len = (batch.num_rows() - self.row_in_batch).min(self.batch_size);
            let slice = batch.slice(self.row_in_batch, len);
            self.row_in_batch += len;

            let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.schema.fields().len());
            if let Some(table_id) = self.node_ids {
                let start = self.next_offset;
                let ids = UInt64Array::from_iter_values(
                    (start..start + len as u64)
                        .map(|offset| NodeId::from_parts(table_id, offset).as_u64()),
                );
                columns.push(Arc::new(ids));
            }
            self.next_offset += len as u64;
            columns.extend(slice.columns().iter().cloned());
            return Ok(Some(RecordBatch::try_new(self.schema(), columns)?));
        }
    }
}
