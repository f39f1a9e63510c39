use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int32Array, Int64Array, StringArray};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llgraph_copy::{
    BulkCopyLoader, CancellationToken, CopyContext, CopyOptions, CopyState, CsvReader,
    SourceKind, WarningSink, copy_into, open_handle,
};
use llgraph_foreign::{DataFrame, ForeignHandle};
use llgraph_result::{Error, Result, RowIntegrityError};
use llgraph_scan::{MemoryStream, RowBatchIterator};
use llgraph_storage::{NodeTable, PersistedTable, StorageManager};
use llgraph_test_utils::{batch, csv_fixture, init_tracing_for_tests, shuffled_keys};
use llgraph_types::{ColumnDescriptor, LogicalType, Value};

struct Harness {
    storage: StorageManager,
    sink: WarningSink,
    cancel: CancellationToken,
    next_statement: u64,
}

impl Harness {
    fn new() -> Self {
        init_tracing_for_tests();
        Self {
            storage: StorageManager::default(),
            sink: WarningSink::default(),
            cancel: CancellationToken::new(),
            next_statement: 0,
        }
    }

    fn ids_table(&self) -> Arc<NodeTable> {
        self.storage
            .create_node_table(
                "ids",
                vec![ColumnDescriptor::new("id", LogicalType::Int64)],
                "id",
            )
            .expect("create ids")
    }

    fn copy(
        &mut self,
        target: &str,
        kind: SourceKind,
        options: CopyOptions,
        source: &mut dyn RowBatchIterator,
    ) -> Result<llgraph_copy::CopySummary> {
        self.next_statement += 1;
        let table = self.storage.table(target)?.expect("target exists");
        copy_into(
            table,
            kind,
            &options,
            source,
            CopyContext {
                statement_id: self.next_statement,
                warnings: &mut self.sink,
                cancel: &self.cancel,
            },
        )
    }
}

fn int32_stream(name: &str, values: Vec<i32>) -> MemoryStream {
    let b = batch(vec![(name, Arc::new(Int32Array::from(values)) as ArrayRef)]);
    MemoryStream::new(b.schema(), vec![b])
}

fn int64_values(table: &NodeTable, column: usize) -> Vec<i64> {
    let data = table.data().unwrap();
    data.batches()
        .iter()
        .flat_map(|b| {
            b.column(column)
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap()
                .values()
                .to_vec()
        })
        .collect()
}

#[test]
fn duplicate_key_aborts_and_leaves_table_unchanged() {
    let mut h = Harness::new();
    let table = h.ids_table();
    h.copy("ids", SourceKind::Arrow, CopyOptions::new(), &mut int32_stream("id", vec![10]))
        .unwrap();

    let err = h
        .copy(
            "ids",
            SourceKind::Arrow,
            CopyOptions::new(),
            &mut int32_stream("id", vec![1, 2, 3, 1]),
        )
        .unwrap_err();
    assert_eq!(
        err.as_row_integrity(),
        Some(&RowIntegrityError::DuplicatePrimaryKey { key: "1".into() })
    );
    assert!(err.to_string().starts_with("Copy exception: Found duplicated primary key value 1"));
    assert_eq!(int64_values(&table, 0), vec![10]);
}

#[test]
fn ignore_errors_skips_duplicate_and_records_one_warning() {
    let mut h = Harness::new();
    let table = h.ids_table();
    let summary = h
        .copy(
            "ids",
            SourceKind::Arrow,
            CopyOptions::new().with("IGNORE_ERRORS", true),
            &mut int32_stream("id", vec![1, 2, 3, 1]),
        )
        .unwrap();
    assert_eq!(summary.rows_committed, 3);
    assert_eq!(summary.rows_skipped, 1);
    assert_eq!(summary.warnings, 1);
    assert_eq!(summary.state, CopyState::Committed);
    assert_eq!(int64_values(&table, 0), vec![1, 2, 3]);

    let warnings = h.sink.entries();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.starts_with("Found duplicated primary key value 1"));
    assert_eq!(warnings[0].source_row, Some(3));
}

#[test]
fn warnings_follow_duplicate_order_across_batches() {
    let mut h = Harness::new();
    let table = h.ids_table();
    let keys = shuffled_keys(200, &[17, 4, 150], 42);
    let batches: Vec<RecordBatch> = keys
        .chunks(64)
        .map(|chunk| {
            batch(vec![(
                "id",
                Arc::new(Int64Array::from(chunk.to_vec())) as ArrayRef,
            )])
        })
        .collect();
    let mut source = MemoryStream::new(batches[0].schema(), batches);
    let summary = h
        .copy(
            "ids",
            SourceKind::Arrow,
            CopyOptions::new().with("ignore_errors", true),
            &mut source,
        )
        .unwrap();
    assert_eq!(summary.rows_committed, 200);
    assert_eq!(summary.rows_skipped, 3);
    assert_eq!(table.num_rows().unwrap(), 200);

    // The second occurrence of each key is the one rejected.
    let mut seen = std::collections::HashSet::new();
    let expected: Vec<(u64, i64)> = keys
        .iter()
        .enumerate()
        .filter(|(_, k)| !seen.insert(**k))
        .map(|(row, k)| (row as u64, *k))
        .collect();
    let actual: Vec<(u64, String)> = h
        .sink
        .entries()
        .iter()
        .map(|w| (w.source_row.unwrap(), w.message.clone()))
        .collect();
    assert_eq!(actual.len(), expected.len());
    for ((row, message), (expected_row, key)) in actual.iter().zip(&expected) {
        assert_eq!(row, expected_row);
        assert!(message.contains(&format!("value {key},")));
    }
}

#[test]
fn ignore_errors_commits_even_when_every_row_is_skipped() {
    let mut h = Harness::new();
    let table = h.ids_table();
    let b = batch(vec![(
        "id",
        Arc::new(Int64Array::from(vec![None::<i64>, None])) as ArrayRef,
    )]);
    let mut source = MemoryStream::new(b.schema(), vec![b]);
    let summary = h
        .copy(
            "ids",
            SourceKind::Arrow,
            CopyOptions::new().with("IGNORE_ERRORS", true),
            &mut source,
        )
        .unwrap();
    assert_eq!(summary.rows_committed, 0);
    assert_eq!(summary.rows_skipped, 2);
    assert_eq!(summary.state, CopyState::Committed);
    assert_eq!(table.num_rows().unwrap(), 0);
    assert!(h.sink.entries()[0].message.contains("non-null constraint"));
}

#[test]
fn unknown_option_fails_before_any_row() {
    let mut h = Harness::new();
    let table = h.ids_table();
    let err = h
        .copy(
            "ids",
            SourceKind::Arrow,
            CopyOptions::new().with("INVALID_OPTION", true),
            &mut int32_stream("id", vec![1, 2, 3]),
        )
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Binder exception: INVALID_OPTION Option not recognized by Arrow scanner."
    );
    assert_eq!(table.num_rows().unwrap(), 0);
}

#[test]
fn unsupported_handle_shape_reports_type_name() {
    init_tracing_for_tests();
    let handle = ForeignHandle::from_value(vec![1i64, 2, 3]);
    let err = open_handle(handle).err().expect("list values are not scannable");
    assert!(matches!(err, Error::UnsupportedSourceType(_)));
    assert!(
        err.to_string()
            .contains("Trying to scan from unsupported data type INT64[].")
    );
}

#[test]
fn data_frame_handle_uses_data_frame_scanner() {
    let mut h = Harness::new();
    let table = h.ids_table();
    let df = DataFrame::new().with_column("id", vec![Value::Int(5), Value::Int(6)]);
    let (kind, mut cursor) = open_handle(ForeignHandle::from_data_frame(df)).unwrap();
    assert_eq!(kind, SourceKind::DataFrame);

    let err = h
        .copy(
            "ids",
            kind,
            CopyOptions::new().with("HEADER", true),
            &mut int32_stream("id", vec![1]),
        )
        .unwrap_err();
    assert!(err.to_string().contains("not recognized by DataFrame scanner"));

    h.copy("ids", kind, CopyOptions::new(), &mut cursor).unwrap();
    assert_eq!(int64_values(&table, 0), vec![5, 6]);
}

#[test]
fn narrowing_copy_fails_at_validation() {
    let mut h = Harness::new();
    let table = h
        .storage
        .create_node_table(
            "small",
            vec![ColumnDescriptor::new("id", LogicalType::Int32)],
            "id",
        )
        .unwrap();
    let b = batch(vec![("id", Arc::new(Int64Array::from(vec![1])) as ArrayRef)]);
    let mut source = MemoryStream::new(b.schema(), vec![b]);
    let err = h
        .copy("small", SourceKind::Arrow, CopyOptions::new(), &mut source)
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));
    assert_eq!(table.num_rows().unwrap(), 0);
}

#[test]
fn csv_copy_honours_header_and_delimiter() {
    let mut h = Harness::new();
    let table = h
        .storage
        .create_node_table(
            "person",
            vec![
                ColumnDescriptor::new("id", LogicalType::Int64),
                ColumnDescriptor::new("name", LogicalType::String),
            ],
            "id",
        )
        .unwrap();
    let file = csv_fixture("1;alice\n2;bob\n");
    let options = CopyOptions::new().with("HEADER", false).with("DELIM", ";");
    let mut loader = BulkCopyLoader::new(
        PersistedTable::Node(Arc::clone(&table)),
        SourceKind::Csv,
        &options,
    )
    .unwrap();
    let mut session = CsvReader::new(loader.options().csv.clone())
        .open(file.path(), &loader.source_layout())
        .unwrap();
    let summary = loader
        .run(
            &mut session,
            CopyContext {
                statement_id: 1,
                warnings: &mut h.sink,
                cancel: &h.cancel,
            },
        )
        .unwrap();
    assert_eq!(summary.rows_committed, 2);
    let data = table.data().unwrap();
    let names = data.batches()[0]
        .column(1)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(names.value(1), "bob");
}

fn graph(h: &Harness) {
    h.storage
        .create_node_table(
            "person",
            vec![ColumnDescriptor::new("id", LogicalType::Int64)],
            "id",
        )
        .unwrap();
    h.storage
        .create_node_table(
            "city",
            vec![ColumnDescriptor::new("name", LogicalType::String)],
            "name",
        )
        .unwrap();
    h.storage
        .create_rel_table(
            "knows",
            &[("person", "person")],
            vec![ColumnDescriptor::new("weight", LogicalType::Int64)],
        )
        .unwrap();
    h.storage
        .create_rel_table("visits", &[("person", "city"), ("city", "city")], vec![])
        .unwrap();
    let mut writer = h.storage.node_table("person").unwrap().unwrap().begin_write().unwrap();
    writer
        .append(
            &[Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef],
            &mut |f| panic!("{f:?}"),
        )
        .unwrap();
    writer.commit().unwrap();
}

fn edges(from: Vec<i64>, to: Vec<i64>, weight: Vec<i64>) -> MemoryStream {
    let b = batch(vec![
        ("from", Arc::new(Int64Array::from(from)) as ArrayRef),
        ("to", Arc::new(Int64Array::from(to)) as ArrayRef),
        ("weight", Arc::new(Int64Array::from(weight)) as ArrayRef),
    ]);
    MemoryStream::new(b.schema(), vec![b])
}

#[test]
fn relationship_copy_rejects_unresolved_endpoint() {
    let mut h = Harness::new();
    graph(&h);
    let err = h
        .copy(
            "knows",
            SourceKind::Arrow,
            CopyOptions::new(),
            &mut edges(vec![1, 2], vec![2, 9], vec![5, 6]),
        )
        .unwrap_err();
    assert_eq!(
        err.as_row_integrity(),
        Some(&RowIntegrityError::UnresolvedEndpoint { key: "9".into() })
    );
    let knows = h.storage.rel_table("knows").unwrap().unwrap();
    assert_eq!(knows.num_rows().unwrap(), 0);

    let summary = h
        .copy(
            "knows",
            SourceKind::Arrow,
            CopyOptions::new().with("IGNORE_ERRORS", true),
            &mut edges(vec![1, 2], vec![2, 9], vec![5, 6]),
        )
        .unwrap();
    assert_eq!(summary.rows_committed, 1);
    assert_eq!(
        h.sink.entries()[0].message,
        "Unable to find primary key value 9."
    );
    assert_eq!(knows.num_rows().unwrap(), 1);
}

#[test]
fn multi_pair_relationship_requires_from_and_to() {
    let mut h = Harness::new();
    graph(&h);
    let b = batch(vec![
        ("from", Arc::new(Int64Array::from(vec![1])) as ArrayRef),
        ("to", Arc::new(StringArray::from(vec!["x"])) as ArrayRef),
    ]);
    let err = h
        .copy(
            "visits",
            SourceKind::Arrow,
            CopyOptions::new(),
            &mut MemoryStream::new(b.schema(), vec![b.clone()]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOption(ref msg) if msg.contains("multiple FROM and TO pairs")));

    let summary = h
        .copy(
            "visits",
            SourceKind::Arrow,
            CopyOptions::new()
                .with("FROM", "person")
                .with("TO", "city")
                .with("IGNORE_ERRORS", true),
            &mut MemoryStream::new(b.schema(), vec![b]),
        )
        .unwrap();
    // No city named "x" exists yet.
    assert_eq!(summary.rows_skipped, 1);
}

#[test]
fn second_writer_conflicts() {
    let mut h = Harness::new();
    let table = h.ids_table();
    let _held = table.begin_write().unwrap();
    let err = h
        .copy(
            "ids",
            SourceKind::Arrow,
            CopyOptions::new(),
            &mut int32_stream("id", vec![1]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::TransactionContextError(_)));
}

#[test]
fn cancellation_before_first_batch_leaves_table_untouched() {
    let mut h = Harness::new();
    let table = h.ids_table();
    h.cancel.cancel();
    let err = h
        .copy(
            "ids",
            SourceKind::Arrow,
            CopyOptions::new(),
            &mut int32_stream("id", vec![1, 2]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert_eq!(table.num_rows().unwrap(), 0);
}

/// Cancels the shared token after handing out its first batch.
struct CancelAfterFirst {
    inner: MemoryStream,
    cancel: CancellationToken,
}

impl RowBatchIterator for CancelAfterFirst {
    fn schema(&self) -> SchemaRef {
        self.inner.schema()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let next = self.inner.next_batch()?;
        self.cancel.cancel();
        Ok(next)
    }
}

#[test]
fn cancellation_under_ignore_errors_commits_rows_read_so_far() {
    let mut h = Harness::new();
    let table = h.ids_table();
    let batches: Vec<RecordBatch> = [vec![1i64, 2], vec![3, 4]]
        .into_iter()
        .map(|ids| batch(vec![("id", Arc::new(Int64Array::from(ids)) as ArrayRef)]))
        .collect();
    let mut source = CancelAfterFirst {
        inner: MemoryStream::new(batches[0].schema(), batches),
        cancel: h.cancel.clone(),
    };
    let summary = h
        .copy(
            "ids",
            SourceKind::Arrow,
            CopyOptions::new().with("IGNORE_ERRORS", true),
            &mut source,
        )
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.rows_committed, 2);
    assert_eq!(summary.warnings, 1);
    assert!(h.sink.entries()[0].message.contains("cancelled"));
    assert_eq!(int64_values(&table, 0), vec![1, 2]);

    h.cancel.reset();
    let batches: Vec<RecordBatch> = [vec![5i64], vec![6]]
        .into_iter()
        .map(|ids| batch(vec![("id", Arc::new(Int64Array::from(ids)) as ArrayRef)]))
        .collect();
    let mut source = CancelAfterFirst {
        inner: MemoryStream::new(batches[0].schema(), batches),
        cancel: h.cancel.clone(),
    };
    let err = h
        .copy("ids", SourceKind::Arrow, CopyOptions::new(), &mut source)
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)));
    assert_eq!(table.num_rows().unwrap(), 2);
}
