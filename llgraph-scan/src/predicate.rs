//! Row predicates evaluated with Arrow compute kernels.

use std::sync::Arc;

use arrow::array::{Array, BooleanArray, Datum, Scalar};
use arrow::compute::kernels::boolean::{and_kleene, is_not_null, is_null, not, or_kleene};
use arrow::compute::kernels::cmp;
use arrow::compute::filter_record_batch;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llgraph_result::{Error, Result};
use llgraph_types::Value;

use crate::{BoxedRowIterator, RowBatchIterator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Boolean expression over the columns of a batch.
///
/// Comparisons with null yield null, and rows whose predicate is null are
/// dropped by [`FilterStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    IsNull(String),
    IsNotNull(String),
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against every row of `batch`.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        match self {
            Predicate::Compare { column, op, value } => {
                let array = column_by_name(batch, column)?;
                if value.is_null() {
                    return Ok(BooleanArray::new_null(array.len()));
                }
                let scalar = Scalar::new(value.to_scalar_array(array.data_type())?);
                let lhs: &dyn Datum = array;
                let out = match op {
                    CompareOp::Eq => cmp::eq(lhs, &scalar)?,
                    CompareOp::NotEq => cmp::neq(lhs, &scalar)?,
                    CompareOp::Lt => cmp::lt(lhs, &scalar)?,
                    CompareOp::LtEq => cmp::lt_eq(lhs, &scalar)?,
                    CompareOp::Gt => cmp::gt(lhs, &scalar)?,
                    CompareOp::GtEq => cmp::gt_eq(lhs, &scalar)?,
                };
                Ok(out)
            }
            Predicate::And(left, right) => {
                Ok(and_kleene(&left.evaluate(batch)?, &right.evaluate(batch)?)?)
            }
            Predicate::Or(left, right) => {
                Ok(or_kleene(&left.evaluate(batch)?, &right.evaluate(batch)?)?)
            }
            Predicate::Not(inner) => Ok(not(&inner.evaluate(batch)?)?),
            Predicate::IsNull(column) => Ok(is_null(column_by_name(batch, column)?)?),
            Predicate::IsNotNull(column) => Ok(is_not_null(column_by_name(batch, column)?)?),
        }
    }
}

fn column_by_name<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Arc<dyn Array>> {
    let idx = batch.schema().index_of(name).map_err(|_| {
        Error::InvalidArgumentError(format!("predicate references unknown column '{name}'"))
    })?;
    Ok(batch.column(idx))
}

/// Keeps the rows of its input for which the predicate is true.
pub struct FilterStream {
    input: BoxedRowIterator,
    predicate: Predicate,
}

impl FilterStream {
    pub fn new(input: BoxedRowIterator, predicate: Predicate) -> Self {
        Self { input, predicate }
    }
}

impl RowBatchIterator for FilterStream {
    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        while let Some(batch) = self.input.next_batch()? {
            let mask = self.predicate.evaluate(&batch)?;
            let filtered = filter_record_batch(&batch, &mask)?;
            if filtered.num_rows() > 0 {
                return Ok(Some(filtered));
            }
        }
        Ok(None)
    }
}
