use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use llgraph_result::{Error, Result};
use llgraph_types::{Value, values_to_array};

/// Named columns of host values.
///
/// Data frames are converted to a single Arrow record batch when they are
/// scanned or copied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    columns: Vec<(String, Vec<Value>)>,
}

impl DataFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        self.columns
            .push((name.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|(_, v)| v.len()).unwrap_or(0)
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let num_rows = self.num_rows();
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());
        for (name, values) in &self.columns {
            if values.len() != num_rows {
                return Err(Error::InvalidArgumentError(format!(
                    "data frame column '{name}' has {} values, expected {num_rows}",
                    values.len()
                )));
            }
            let array = values_to_array(values).map_err(|err| match err {
                Error::InvalidArgumentError(msg) => {
                    Error::InvalidArgumentError(format!("data frame column '{name}': {msg}"))
                }
                other => other,
            })?;
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        Ok(RecordBatch::try_new_with_options(
            Arc::new(Schema::new(fields)),
            arrays,
            &options,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;

    #[test]
    fn converts_columns_in_order() {
        let df = DataFrame::new()
            .with_column("id", [1, 2, 3])
            .with_column("name", ["a", "b", "c"]);
        let batch = df.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(batch.schema().field(1).name(), "name");
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let df = DataFrame::new()
            .with_column("id", [1, 2])
            .with_column("name", ["a"]);
        assert!(df.to_record_batch().is_err());
    }
}
