//! Inner equi-join of two row streams.
//!
//! The right input is drained and hashed once; the left input is probed batch
//! by batch. Output rows follow left order, and for each left row the matching
//! right rows follow right order. Null keys never match.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt32Builder};
use arrow::compute::{cast, concat_batches, take};
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use llgraph_result::{Error, Result};
use rustc_hash::FxHashMap;

use crate::{BoxedRowIterator, RowBatchIterator, collect};

pub struct HashJoinStream {
    schema: SchemaRef,
    left: BoxedRowIterator,
    left_key: usize,
    right_batch: RecordBatch,
    converter: RowConverter,
    map: FxHashMap<Vec<u8>, Vec<u32>>,
}

impl HashJoinStream {
    /// Join `left.left_key = right.right_key`. The output schema is the left
    /// schema followed by the right schema.
    pub fn try_new(
        left: BoxedRowIterator,
        mut right: BoxedRowIterator,
        left_key: &str,
        right_key: &str,
    ) -> Result<Self> {
        let left_schema = left.schema();
        let right_schema = right.schema();
        let left_key = key_index(&left_schema, left_key)?;
        let right_key = key_index(&right_schema, right_key)?;

        let right_batches = collect(right.as_mut())?;
        let right_batch = concat_batches(&right_schema, &right_batches)?;

        let key_type = left_schema.field(left_key).data_type().clone();
        let converter = RowConverter::new(vec![SortField::new(key_type.clone())])?;
        let right_keys = align_key(right_batch.column(right_key), &key_type)?;
        let rows = converter.convert_columns(&[Arc::clone(&right_keys)])?;

        let mut map: FxHashMap<Vec<u8>, Vec<u32>> = FxHashMap::default();
        for i in 0..rows.num_rows() {
            if right_keys.is_null(i) {
                continue;
            }
            let idx = u32::try_from(i).map_err(|_| {
                Error::InvalidArgumentError("hash join build side exceeds u32 rows".into())
            })?;
            map.entry(rows.row(i).as_ref().to_vec()).or_default().push(idx);
        }
        tracing::trace!(
            "[SCAN] hash join built {} keys from {} rows",
            map.len(),
            right_batch.num_rows()
        );

        let mut fields = left_schema.fields().to_vec();
        fields.extend(right_schema.fields().iter().cloned());
        Ok(Self {
            schema: Arc::new(Schema::new(fields)),
            left,
            left_key,
            right_batch,
            converter,
            map,
        })
    }
}

impl RowBatchIterator for HashJoinStream {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        while let Some(batch) = self.left.next_batch()? {
            let keys = batch.column(self.left_key);
            let rows = self.converter.convert_columns(&[Arc::clone(keys)])?;
            let mut left_indices = UInt32Builder::new();
            let mut right_indices = UInt32Builder::new();
            for i in 0..rows.num_rows() {
                if keys.is_null(i) {
                    continue;
                }
                if let Some(matches) = self.map.get(rows.row(i).as_ref()) {
                    for right in matches {
                        left_indices.append_value(i as u32);
                        right_indices.append_value(*right);
                    }
                }
            }
            let left_indices = left_indices.finish();
            if left_indices.is_empty() {
                continue;
            }
            let right_indices = right_indices.finish();
            let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.schema.fields().len());
            for col in batch.columns() {
                columns.push(take(col.as_ref(), &left_indices, None)?);
            }
            for col in self.right_batch.columns() {
                columns.push(take(col.as_ref(), &right_indices, None)?);
            }
            return Ok(Some(RecordBatch::try_new(self.schema(), columns)?));
        }
        Ok(None)
    }
}

fn key_index(schema: &Schema, name: &str) -> Result<usize> {
    schema
        .index_of(name)
        .map_err(|_| Error::InvalidArgumentError(format!("join key '{name}' not found")))
}

fn align_key(array: &ArrayRef, key_type: &arrow::datatypes::DataType) -> Result<ArrayRef> {
    if array.data_type() == key_type {
        Ok(Arc::clone(array))
    } else {
        Ok(cast(array.as_ref(), key_type)?)
    }
}
