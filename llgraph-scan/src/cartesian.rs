//! Cartesian products of row streams.
//!
//! Disconnected pattern parts (`MATCH (x:A), (y:B)`) are combined by
//! replicating every left row for each right row. The right input is
//! materialised once; the left input streams.

use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, UInt32Array};
use arrow::compute::{concat_batches, take};
use arrow::datatypes::{Schema, SchemaRef};
use llgraph_result::{Error, Result};

use crate::{BoxedRowIterator, RowBatchIterator, collect};

/// Streaming cartesian product: left batches, each paired with all right rows.
///
/// Output columns are the left columns followed by the right columns, and
/// rows come out left-major.
pub struct CrossJoinStream {
    schema: SchemaRef,
    left: BoxedRowIterator,
    right: RecordBatch,
}

impl CrossJoinStream {
    pub fn try_new(left: BoxedRowIterator, mut right: BoxedRowIterator) -> Result<Self> {
        let right_schema = right.schema();
        let right_batches = collect(right.as_mut())?;
        let right = concat_batches(&right_schema, &right_batches)?;
        if u32::try_from(right.num_rows()).is_err() {
            return Err(Error::InvalidArgumentError(format!(
                "cross join right input has {} rows, more than a batch can index",
                right.num_rows()
            )));
        }
        let mut fields = left.schema().fields().to_vec();
        fields.extend(right_schema.fields().iter().cloned());
        Ok(Self {
            schema: Arc::new(Schema::new(fields)),
            left,
            right,
        })
    }

    /// Pair every row of `left` with every buffered right row.
    fn product(&self, left: &RecordBatch) -> Result<RecordBatch> {
        let width = self.right.num_rows();
        let rows = left
            .num_rows()
            .checked_mul(width)
            .filter(|rows| u32::try_from(*rows).is_ok())
            .ok_or_else(|| {
                Error::InvalidArgumentError(format!(
                    "cross join of {} x {width} rows does not fit in one batch",
                    left.num_rows()
                ))
            })?;
        let width = width as u32;
        let outer = UInt32Array::from_iter_values((0..rows as u32).map(|i| i / width));
        let inner = UInt32Array::from_iter_values((0..rows as u32).map(|i| i % width));

        let columns = left
            .columns()
            .iter()
            .map(|col| take(col.as_ref(), &outer, None))
            .chain(self.right.columns().iter().map(|col| take(col.as_ref(), &inner, None)))
            .collect::<std::result::Result<Vec<ArrayRef>, _>>()?;
        Ok(RecordBatch::try_new(self.schema(), columns)?)
    }
}

impl RowBatchIterator for CrossJoinStream {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.right.num_rows() == 0 {
            return Ok(None);
        }
        while let Some(batch) = self.left.next_batch()? {
            if batch.num_rows() > 0 {
                return self.product(&batch).map(Some);
            }
        }
        Ok(None)
    }
}
