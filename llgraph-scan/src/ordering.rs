use std::sync::Arc;

use arrow::compute::{SortColumn, SortOptions, concat_batches, lexsort_to_indices, take};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llgraph_result::{Error, Result};

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Concatenate `batches` and sort the rows by `keys`, nulls last.
pub fn sort_batches(
    schema: &SchemaRef,
    batches: &[RecordBatch],
    keys: &[SortKey],
) -> Result<RecordBatch> {
    let combined = concat_batches(schema, batches)?;
    if keys.is_empty() || combined.num_rows() < 2 {
        return Ok(combined);
    }
    let sort_columns = keys
        .iter()
        .map(|key| {
            let idx = schema.index_of(&key.column).map_err(|_| {
                Error::InvalidArgumentError(format!("cannot order by unknown column '{}'", key.column))
            })?;
            Ok(SortColumn {
                values: Arc::clone(combined.column(idx)),
                options: Some(SortOptions {
                    descending: key.descending,
                    nulls_first: false,
                }),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let indices = lexsort_to_indices(&sort_columns, None)?;
    let columns = combined
        .columns()
        .iter()
        .map(|col| take(col.as_ref(), &indices, None).map_err(Error::from))
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(Arc::clone(schema), columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, ArrayRef, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    #[test]
    fn sorts_across_batches_with_tie_breaker() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Int64, true),
            Field::new("y", DataType::Int64, true),
        ]));
        let make = |x: Vec<i64>, y: Vec<i64>| {
            RecordBatch::try_new(
                Arc::clone(&schema),
                vec![
                    Arc::new(Int64Array::from(x)) as ArrayRef,
                    Arc::new(Int64Array::from(y)) as ArrayRef,
                ],
            )
            .unwrap()
        };
        let batches = vec![make(vec![3, 1], vec![2, 3]), make(vec![1], vec![2])];
        let sorted = sort_batches(&schema, &batches, &[SortKey::asc("x"), SortKey::desc("y")])
            .unwrap();
        let x = sorted.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        let y = sorted.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(x.values().to_vec(), vec![1, 1, 3]);
        assert_eq!(y.values().to_vec(), vec![3, 2, 2]);
    }
}
