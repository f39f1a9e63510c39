//! Scans over virtual tables backed by foreign sources.
//!
//! Foreign batches are passed through in source order. Columns whose foreign
//! type differs from its storage type (dictionaries, large strings, half
//! floats, other timestamp units) are cast; all others are forwarded without
//! copying. Each open scan holds a lifetime token of its source, so host
//! memory outlives an unregistration that happens mid-scan.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanBuilder, UInt64Array, UInt64Builder};
use arrow::compute::filter;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llgraph_foreign::{SourceCursor, VirtualTableEntry, VirtualTableKind};
use llgraph_result::{Error, Result};
use llgraph_types::{
    ColumnDescriptor, DST_ID_COLUMN, INTERNAL_ID_COLUMN, NodeId, NodeKeyLookup, SRC_ID_COLUMN,
    TableId, TypeCoercionMapper, key_at, storage_schema,
};

use crate::{BoxedRowIterator, RowBatchIterator, ScanOptions, ScanSource};

/// Scan of a virtual node table: `_id` followed by the source columns.
pub struct VirtualNodeScan {
    entry: Arc<VirtualTableEntry>,
    table_id: TableId,
    schema: SchemaRef,
}

impl VirtualNodeScan {
    pub fn try_new(entry: Arc<VirtualTableEntry>) -> Result<Self> {
        let table_id = match &entry.kind {
            VirtualTableKind::Node(node) => node.table_id(),
            VirtualTableKind::Rel(_) => {
                return Err(Error::InvalidArgumentError(format!(
                    "virtual table '{}' is not a node table",
                    entry.name
                )));
            }
        };
        let schema = storage_schema(&[INTERNAL_ID_COLUMN], entry.source().descriptors());
        Ok(Self {
            entry,
            table_id,
            schema,
        })
    }
}

impl ScanSource for VirtualNodeScan {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn open_scan(&self, _options: &ScanOptions) -> Result<BoxedRowIterator> {
        let cursor = self.entry.source().open_scan()?;
        tracing::trace!("[SCAN] virtual node table '{}'", self.entry.name);
        Ok(Box::new(VirtualNodeIter {
            cursor,
            schema: self.schema(),
            descriptors: self.entry.source().descriptors().to_vec(),
            table_id: self.table_id,
            next_offset: 0,
        }))
    }
}

struct VirtualNodeIter {
    cursor: SourceCursor,
    schema: SchemaRef,
    descriptors: Vec<ColumnDescriptor>,
    table_id: TableId,
    next_offset: u64,
}

impl RowBatchIterator for VirtualNodeIter {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let Some(batch) = self.cursor.next_batch()? else {
            return Ok(None);
        };
        let len = batch.num_rows() as u64;
        let start = self.next_offset;
        self.next_offset += len;
        let table_id = self.table_id;
        let ids = UInt64Array::from_iter_values(
            (start..start + len).map(|offset| NodeId::from_parts(table_id, offset).as_u64()),
        );
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.schema.fields().len());
        columns.push(Arc::new(ids));
        for (array, desc) in batch.columns().iter().zip(&self.descriptors) {
            columns.push(TypeCoercionMapper::to_storage(array, desc.logical_type)?);
        }
        Ok(Some(RecordBatch::try_new(self.schema(), columns)?))
    }
}

/// Scan of a virtual relationship table: `_src`, `_dst`, then every source
/// column other than the two endpoint columns.
///
/// Endpoint keys are cast to the storage type of the referenced primary key
/// before lookup. Rows whose keys do not resolve to a node are skipped.
pub struct VirtualRelScan {
    entry: Arc<VirtualTableEntry>,
    schema: SchemaRef,
    properties: Vec<usize>,
}

impl VirtualRelScan {
    pub fn try_new(entry: Arc<VirtualTableEntry>) -> Result<Self> {
        let properties = match &entry.kind {
            VirtualTableKind::Rel(rel) => rel.property_columns(),
            VirtualTableKind::Node(_) => {
                return Err(Error::InvalidArgumentError(format!(
                    "virtual table '{}' is not a relationship table",
                    entry.name
                )));
            }
        };
        let descriptors = entry.source().descriptors();
        let property_descriptors: Vec<ColumnDescriptor> = properties
            .iter()
            .map(|idx| descriptors[*idx].clone())
            .collect();
        let schema = storage_schema(&[SRC_ID_COLUMN, DST_ID_COLUMN], &property_descriptors);
        Ok(Self {
            entry,
            schema,
            properties,
        })
    }
}

impl ScanSource for VirtualRelScan {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn open_scan(&self, _options: &ScanOptions) -> Result<BoxedRowIterator> {
        let VirtualTableKind::Rel(rel) = &self.entry.kind else {
            return Err(Error::Internal("relationship entry changed kind".into()));
        };
        let cursor = rel.source().open_scan()?;
        tracing::trace!("[SCAN] virtual relationship table '{}'", self.entry.name);
        let descriptors = rel.source().descriptors();
        Ok(Box::new(VirtualRelIter {
            cursor,
            schema: self.schema(),
            from: Arc::clone(rel.from_table()),
            to: Arc::clone(rel.to_table()),
            from_column: rel.from_column(),
            to_column: rel.to_column(),
            properties: self
                .properties
                .iter()
                .map(|idx| (*idx, descriptors[*idx].clone()))
                .collect(),
            table_name: self.entry.name.clone(),
        }))
    }
}

struct VirtualRelIter {
    cursor: SourceCursor,
    schema: SchemaRef,
    from: Arc<dyn NodeKeyLookup>,
    to: Arc<dyn NodeKeyLookup>,
    from_column: usize,
    to_column: usize,
    properties: Vec<(usize, ColumnDescriptor)>,
    table_name: String,
}

impl VirtualRelIter {
    fn resolve(table: &dyn NodeKeyLookup, keys: &ArrayRef, row: usize) -> Result<Option<u64>> {
        Ok(key_at(keys, row)?
            .and_then(|key| table.lookup_offset(&key))
            .map(|offset| NodeId::from_parts(table.table_id(), offset).as_u64()))
    }
}

impl RowBatchIterator for VirtualRelIter {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let Some(batch) = self.cursor.next_batch()? else {
            return Ok(None);
        };
        let num_rows = batch.num_rows();
        let src_keys = TypeCoercionMapper::to_storage(
            batch.column(self.from_column),
            self.from.primary_key_type(),
        )?;
        let dst_keys = TypeCoercionMapper::to_storage(
            batch.column(self.to_column),
            self.to.primary_key_type(),
        )?;
        let mut src = UInt64Builder::with_capacity(num_rows);
        let mut dst = UInt64Builder::with_capacity(num_rows);
        let mut keep = BooleanBuilder::with_capacity(num_rows);
        let mut skipped = 0usize;

        for row in 0..num_rows {
            let from = Self::resolve(self.from.as_ref(), &src_keys, row)?;
            let to = Self::resolve(self.to.as_ref(), &dst_keys, row)?;
            match (from, to) {
                (Some(from), Some(to)) => {
                    src.append_value(from);
                    dst.append_value(to);
                    keep.append_value(true);
                }
                _ => {
                    skipped += 1;
                    keep.append_value(false);
                }
            }
        }
        if skipped > 0 {
            tracing::debug!(
                "[SCAN] skipped {} rows of '{}' with unresolved endpoints",
                skipped,
                self.table_name
            );
        }

        let mask = keep.finish();
        let mut columns: Vec<ArrayRef> = vec![Arc::new(src.finish()), Arc::new(dst.finish())];
        for (idx, desc) in &self.properties {
            let stored = TypeCoercionMapper::to_storage(batch.column(*idx), desc.logical_type)?;
            columns.push(if skipped == 0 {
                stored
            } else {
                filter(stored.as_ref(), &mask)?
            });
        }
        Ok(Some(RecordBatch::try_new(self.schema(), columns)?))
    }
}
