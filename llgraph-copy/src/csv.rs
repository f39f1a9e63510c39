//! CSV files as copy sources.
//!
//! Column names come from the header line (or `column_N` without one). Each
//! column is parsed directly into the type of the target column it maps to:
//! by header name when the name matches a target column, otherwise by
//! position. Columns with no counterpart are read as strings and rejected by
//! the loader's column mapping.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::csv::reader::{Format, Reader, ReaderBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use llgraph_result::Result;
use llgraph_scan::RowBatchIterator;

#[derive(Debug, Clone)]
pub struct CsvReadOptions {
    pub has_header: bool,
    pub delimiter: u8,
    pub batch_size: Option<usize>,
}

impl Default for CsvReadOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
            batch_size: None,
        }
    }
}

impl CsvReadOptions {
    pub(crate) fn to_format(&self) -> Format {
        let mut format = Format::default().with_header(self.has_header);
        if self.delimiter != b',' {
            format = format.with_delimiter(self.delimiter);
        }
        format
    }
}

#[derive(Debug, Clone, Default)]
pub struct CsvReader {
    options: CsvReadOptions,
}

impl CsvReader {
    pub fn new(options: CsvReadOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CsvReadOptions {
        &self.options
    }

    /// Column names of the file, from the header or positional defaults.
    pub fn column_names(&self, path: &Path) -> Result<Vec<String>> {
        let file = File::open(path)?;
        let (schema, _) = self.options.to_format().infer_schema(file, Some(1))?;
        Ok(schema.fields().iter().map(|f| f.name().clone()).collect())
    }

    /// Open `path`, parsing each column into the type of its target column.
    ///
    /// `layout` lists the target columns in order as `(name, storage type)`.
    pub fn open(&self, path: &Path, layout: &[(String, DataType)]) -> Result<CsvReadSession> {
        let names = self.column_names(path)?;
        let fields: Vec<Field> = names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let data_type = layout
                    .iter()
                    .find(|(target, _)| target == name)
                    .or_else(|| layout.get(idx))
                    .map(|(_, ty)| ty.clone())
                    .unwrap_or(DataType::Utf8);
                Field::new(name, data_type, true)
            })
            .collect();
        let schema = Arc::new(Schema::new(fields));

        let file = File::open(path)?;
        let mut builder =
            ReaderBuilder::new(Arc::clone(&schema)).with_format(self.options.to_format());
        if let Some(batch_size) = self.options.batch_size {
            builder = builder.with_batch_size(batch_size);
        }
        let reader = builder.build(file)?;
        tracing::debug!(
            "[COPY] opened CSV file {} with {} columns",
            path.display(),
            schema.fields().len()
        );
        Ok(CsvReadSession { schema, reader })
    }
}

pub struct CsvReadSession {
    schema: SchemaRef,
    reader: Reader<File>,
}

impl RowBatchIterator for CsvReadSession {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        match self.reader.next() {
            Some(batch) => Ok(Some(batch?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, StringArray};
    use llgraph_test_utils::csv_fixture;

    fn layout() -> Vec<(String, DataType)> {
        vec![
            ("id".to_string(), DataType::Int64),
            ("name".to_string(), DataType::Utf8),
        ]
    }

    #[test]
    fn header_names_pick_target_types() {
        let file = csv_fixture("name,id\nalice,1\nbob,2\n");
        let mut session = CsvReader::default().open(file.path(), &layout()).unwrap();
        assert_eq!(session.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(session.schema().field(1).data_type(), &DataType::Int64);

        let batch = session.next_batch().unwrap().unwrap();
        let ids = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.values().to_vec(), vec![1, 2]);
        assert!(session.next_batch().unwrap().is_none());
    }

    #[test]
    fn headerless_files_with_custom_delimiter() {
        let file = csv_fixture("1|alice\n2|\n3|carol\n");
        let options = CsvReadOptions {
            has_header: false,
            delimiter: b'|',
            batch_size: Some(2),
        };
        let mut session = CsvReader::new(options).open(file.path(), &layout()).unwrap();
        assert_eq!(session.schema().field(0).name(), "column_1");

        let first = session.next_batch().unwrap().unwrap();
        assert_eq!(first.num_rows(), 2);
        let names = first.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "alice");
        assert!(names.is_null(1));
        assert_eq!(session.next_batch().unwrap().unwrap().num_rows(), 1);
    }
}
