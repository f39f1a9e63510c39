use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::array::{ArrayRef, Int32Array, Int64Array, ListArray, StringArray};
use arrow::datatypes::{DataType, Field, Int64Type, Schema};
use arrow::ffi_stream::FFI_ArrowArrayStream;
use arrow::record_batch::{RecordBatch, RecordBatchIterator};
use llgraph_foreign::{
    CloseOutcome, DataFrame, ForeignHandle, RelEndpoints, VirtualTableCatalog, VirtualTableKind,
};
use llgraph_result::Error;
use llgraph_storage::StorageManager;
use llgraph_test_utils::{batch, init_tracing_for_tests};
use llgraph_types::{
    ColumnDescriptor, LogicalType, NodeKeyLookup, NodeTableResolver, TableIdAllocator,
};

fn people_batch() -> RecordBatch {
    batch(vec![
        ("id", Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef),
        ("name", Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef),
    ])
}

#[test]
fn register_unregister_register_again() {
    init_tracing_for_tests();
    let catalog = VirtualTableCatalog::default();
    catalog
        .register_node("people", ForeignHandle::from_record_batch(people_batch()))
        .expect("register");
    let err = catalog
        .register_node("people", ForeignHandle::from_record_batch(people_batch()))
        .unwrap_err();
    assert!(matches!(err, Error::CatalogError(_)));

    assert_eq!(catalog.unregister("people").unwrap(), CloseOutcome::Released);
    assert!(matches!(
        catalog.unregister("people"),
        Err(Error::CatalogError(_))
    ));
    catalog
        .register_node("people", ForeignHandle::from_record_batch(people_batch()))
        .expect("re-register");
}

#[test]
fn release_hook_waits_for_in_flight_cursor() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    let catalog = VirtualTableCatalog::default();
    catalog
        .register_node(
            "people",
            ForeignHandle::from_record_batch(people_batch()).with_release_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    let entry = catalog.lookup("people").unwrap().expect("entry");
    let mut cursor = entry.source().open_scan().unwrap();
    drop(entry);

    assert_eq!(
        catalog.unregister("people").unwrap(),
        CloseOutcome::Deferred { outstanding: 1 }
    );
    assert_eq!(released.load(Ordering::SeqCst), 0);
    let first = cursor.next_batch().unwrap().expect("batch still readable");
    assert_eq!(first.num_rows(), 3);
    drop(cursor);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn c_stream_handles_are_imported() {
    let data = people_batch();
    let schema = data.schema();
    let reader = RecordBatchIterator::new(vec![Ok(data)], schema);
    let stream = FFI_ArrowArrayStream::new(Box::new(reader));
    let catalog = VirtualTableCatalog::default();
    catalog
        .register_node("people", ForeignHandle::from_c_stream(stream))
        .expect("c stream");
    let entry = catalog.lookup("people").unwrap().unwrap();
    assert_eq!(entry.source().descriptors()[1].logical_type, LogicalType::String);
}

#[test]
fn data_frames_register_like_tables() {
    let catalog = VirtualTableCatalog::default();
    let df = DataFrame::new()
        .with_column("id", [10, 20])
        .with_column("score", [1.5, 2.5]);
    catalog
        .register_node("scores", ForeignHandle::from_data_frame(df))
        .unwrap();
    let entry = catalog.lookup("scores").unwrap().unwrap();
    assert_eq!(entry.source().descriptors()[1].logical_type, LogicalType::Double);
}

#[test]
fn unsupported_values_and_columns_are_rejected() {
    let catalog = VirtualTableCatalog::default();
    let err = catalog
        .register_node("bad", ForeignHandle::from_value(vec![1, 2, 3]))
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("Trying to scan from unsupported data type INT64[]")
    );

    let tags: ArrayRef = Arc::new(ListArray::from_iter_primitive::<Int64Type, _, _>(vec![
        Some(vec![Some(1)]),
    ]));
    let nested = batch(vec![("tags", tags)]);
    let err = catalog
        .register_node("nested", ForeignHandle::from_record_batch(nested))
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedSourceType(_)));
    assert!(catalog.names().unwrap().is_empty());
}

#[test]
fn relationships_resolve_persisted_endpoints() {
    let ids = Arc::new(TableIdAllocator::new());
    let storage = StorageManager::new(Arc::clone(&ids));
    storage
        .create_node_table(
            "person",
            vec![ColumnDescriptor::new("id", LogicalType::Int64)],
            "id",
        )
        .unwrap();
    let catalog = VirtualTableCatalog::new(ids);

    let edges = batch(vec![
        ("foo", Arc::new(Int32Array::from(vec![1])) as ArrayRef),
        ("bar", Arc::new(Int32Array::from(vec![2])) as ArrayRef),
        ("weight", Arc::new(Int64Array::from(vec![5])) as ArrayRef),
    ]);
    catalog
        .register_rel(
            "knows",
            ForeignHandle::from_record_batch(edges.clone()),
            &RelEndpoints::new("person", "person").with_columns("foo", "bar"),
            &storage,
        )
        .expect("explicit endpoint columns");
    let entry = catalog.lookup("knows").unwrap().unwrap();
    match &entry.kind {
        VirtualTableKind::Rel(rel) => {
            assert_eq!(rel.from_table().table_name(), "person");
            assert_eq!(rel.property_columns(), vec![2]);
        }
        VirtualTableKind::Node(_) => panic!("expected relationship entry"),
    }

    let err = catalog
        .register_rel(
            "likes",
            ForeignHandle::from_record_batch(edges),
            &RelEndpoints::new("person", "nobody"),
            &storage,
        )
        .unwrap_err();
    assert!(matches!(err, Error::CatalogResolution(ref msg) if msg.contains("nobody")));
}

#[test]
fn endpoint_types_must_match_primary_keys() {
    let catalog = VirtualTableCatalog::default();
    catalog
        .register_node("people", ForeignHandle::from_record_batch(people_batch()))
        .unwrap();
    let schema = Arc::new(Schema::new(vec![
        Field::new("from", DataType::Utf8, true),
        Field::new("to", DataType::Utf8, true),
    ]));
    let edges = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(vec!["1"])) as ArrayRef,
            Arc::new(StringArray::from(vec!["2"])) as ArrayRef,
        ],
    )
    .unwrap();
    let err = catalog
        .register_rel(
            "knows",
            ForeignHandle::from_record_batch(edges),
            &RelEndpoints::new("people", "people"),
            &StorageManager::default(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));
}

#[test]
fn register_unregister_churn_reuses_table_ids() {
    let catalog = VirtualTableCatalog::default();
    let ids: ArrayRef = Arc::new(Int64Array::from(vec![1]));
    let data = batch(vec![("id", ids)]);
    for round in 0..70_000u32 {
        catalog
            .register_node("t", ForeignHandle::from_record_batch(data.clone()))
            .unwrap_or_else(|err| panic!("register #{round} failed: {err}"));
        catalog.unregister("t").unwrap();
    }
    catalog
        .register_node("t", ForeignHandle::from_record_batch(data))
        .unwrap();
    let node = catalog.resolve_node_table("t").unwrap();
    assert_eq!(node.table_id(), 1);
}

fn counted(handle: ForeignHandle, released: &Arc<AtomicUsize>) -> ForeignHandle {
    let counter = Arc::clone(released);
    handle.with_release_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn rejected_handles_give_their_memory_back() {
    let released = Arc::new(AtomicUsize::new(0));
    let catalog = VirtualTableCatalog::default();
    catalog
        .register_node("people", ForeignHandle::from_record_batch(people_batch()))
        .unwrap();

    let duplicate = counted(ForeignHandle::from_record_batch(people_batch()), &released);
    assert!(catalog.register_node("people", duplicate).is_err());
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let edges = batch(vec![
        ("from", Arc::new(Int64Array::from(vec![1])) as ArrayRef),
        ("to", Arc::new(Int64Array::from(vec![2])) as ArrayRef),
    ]);
    let dangling = counted(ForeignHandle::from_record_batch(edges), &released);
    let err = catalog
        .register_rel(
            "knows",
            dangling,
            &RelEndpoints::new("people", "nobody"),
            &StorageManager::default(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::CatalogResolution(_)));
    assert_eq!(released.load(Ordering::SeqCst), 2);

    let plain = counted(ForeignHandle::from_value(vec![1, 2, 3]), &released);
    assert!(catalog.register_node("plain", plain).is_err());
    assert_eq!(released.load(Ordering::SeqCst), 3);
    assert_eq!(catalog.names().unwrap(), vec!["people".to_string()]);
}
