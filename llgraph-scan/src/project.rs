use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use llgraph_result::{Error, Result};

use crate::{BoxedRowIterator, RowBatchIterator};

/// Selects columns by name, in the requested order.
pub struct ProjectStream {
    input: BoxedRowIterator,
    indices: Vec<usize>,
    schema: SchemaRef,
}

impl ProjectStream {
    pub fn try_new(input: BoxedRowIterator, columns: &[&str]) -> Result<Self> {
        let input_schema = input.schema();
        let indices = columns
            .iter()
            .map(|name| {
                input_schema.index_of(name).map_err(|_| {
                    Error::InvalidArgumentError(format!("cannot project unknown column '{name}'"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let schema = Arc::new(input_schema.project(&indices)?);
        Ok(Self {
            input,
            indices,
            schema,
        })
    }
}

impl RowBatchIterator for ProjectStream {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        match self.input.next_batch()? {
            Some(batch) => Ok(Some(batch.project(&self.indices)?)),
            None => Ok(None),
        }
    }
}

/// Prefixes every column name with `alias.`, so pattern variables over the
/// same table can be joined without name clashes.
pub struct QualifiedStream {
    input: BoxedRowIterator,
    schema: SchemaRef,
}

impl QualifiedStream {
    pub fn new(input: BoxedRowIterator, alias: &str) -> Self {
        let fields: Vec<Field> = input
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone().with_name(format!("{alias}.{}", f.name())))
            .collect();
        Self {
            input,
            schema: Arc::new(Schema::new(fields)),
        }
    }
}

impl RowBatchIterator for QualifiedStream {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        match self.input.next_batch()? {
            Some(batch) => Ok(Some(RecordBatch::try_new(
                self.schema(),
                batch.columns().to_vec(),
            )?)),
            None => Ok(None),
        }
    }
}
