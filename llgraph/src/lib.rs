//! llgraph: foreign columnar data in an embedded property graph.
//!
//! This crate is the entry point of the workspace. A [`Database`] owns the
//! persisted node and relationship tables and the catalog of virtual tables;
//! a [`Connection`] runs statements against it:
//!
//! - register host-owned Arrow data as virtual node or relationship tables,
//! - scan any table, virtual or persisted, through one iterator type,
//! - bulk-copy from host handles, virtual tables, CSV files or query output
//!   into persisted tables, with `IGNORE_ERRORS` turning row failures into
//!   warnings.
//!
//! ```rust
//! use std::sync::Arc;
//! use arrow::array::{ArrayRef, Int64Array};
//! use arrow::record_batch::RecordBatch;
//! use llgraph::{ColumnDescriptor, CopySource, CopyStatement, Database, ForeignHandle, LogicalType};
//!
//! let db = Database::default();
//! let conn = db.connect();
//! conn.create_node_table("ids", vec![ColumnDescriptor::new("id", LogicalType::Int64)], "id")
//!     .unwrap();
//!
//! let batch = RecordBatch::try_from_iter(vec![(
//!     "id",
//!     Arc::new(Int64Array::from(vec![1, 2, 1])) as ArrayRef,
//! )])
//! .unwrap();
//! let summary = conn
//!     .copy(
//!         CopyStatement::new("ids", CopySource::Handle(ForeignHandle::from_record_batch(batch)))
//!             .with_option("IGNORE_ERRORS", true),
//!     )
//!     .unwrap();
//! assert_eq!(summary.rows_committed, 2);
//! assert_eq!(conn.warnings().unwrap().len(), 1);
//! ```

pub mod config;
pub mod connection;
pub mod database;

pub use config::{ConnectionConfig, DatabaseConfig};
pub use connection::{Connection, CopySource, CopyStatement};
pub use database::Database;

pub use llgraph_copy::{CancellationToken, CopyOptions, CopyState, CopySummary, Warning};
pub use llgraph_foreign::{CloseOutcome, DataFrame, ForeignHandle};
pub use llgraph_result::{Error, Result, RowIntegrityError};
pub use llgraph_types::{ColumnDescriptor, LogicalType, SourceId, Value};

/// Row streams and the operators that combine them.
pub mod scan {
    pub use llgraph_scan::{
        BoxedRowIterator, CompareOp, CrossJoinStream, FilterStream, HashJoinStream, MemoryStream,
        Predicate, ProjectStream, QualifiedStream, RowBatchIterator, ScanOptions, ScanSource,
        SortKey, collect, collect_batch, sort_batches,
    };
}
