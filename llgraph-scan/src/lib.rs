//! Uniform scans over persisted and virtual graph tables.
//!
//! Every table, wherever its rows live, is read through [`ScanSource`] and
//! yields a boxed [`RowBatchIterator`]. Node scans expose the internal node
//! id as `_id` followed by the table's columns; relationship scans expose
//! `_src` and `_dst` followed by properties. The operators in this crate
//! (filter, projection, qualification, joins, sorting) consume and produce
//! the same iterator type, so a pattern matcher can join virtual and
//! persisted tables without knowing which is which.

pub mod cartesian;
pub mod join;
pub mod ordering;
pub mod persisted;
pub mod predicate;
pub mod project;
pub mod virtual_scan;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llgraph_foreign::SourceCursor;
use llgraph_result::Result;

pub use cartesian::CrossJoinStream;
pub use join::HashJoinStream;
pub use ordering::{SortKey, sort_batches};
pub use persisted::{PersistedNodeScan, PersistedRelScan};
pub use predicate::{CompareOp, FilterStream, Predicate};
pub use project::{ProjectStream, QualifiedStream};
pub use virtual_scan::{VirtualNodeScan, VirtualRelScan};

/// Pull-based stream of record batches sharing one schema.
pub trait RowBatchIterator {
    fn schema(&self) -> SchemaRef;

    /// Next batch, or `None` once the stream is exhausted.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>>;
}

pub type BoxedRowIterator = Box<dyn RowBatchIterator + Send>;

impl<T: RowBatchIterator + ?Sized> RowBatchIterator for Box<T> {
    fn schema(&self) -> SchemaRef {
        (**self).schema()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        (**self).next_batch()
    }
}

/// Raw foreign batches, in source order and with their original types.
impl RowBatchIterator for SourceCursor {
    fn schema(&self) -> SchemaRef {
        SourceCursor::schema(self)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        SourceCursor::next_batch(self)
    }
}

/// A table that can be scanned.
pub trait ScanSource {
    fn schema(&self) -> SchemaRef;

    fn open_scan(&self, options: &ScanOptions) -> Result<BoxedRowIterator>;
}

/// Options applied when opening a scan.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// Upper bound on rows per batch for persisted tables. Foreign batches
    /// are passed through at their original size.
    pub batch_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { batch_size: 2048 }
    }
}

impl ScanOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Drain a stream into memory.
pub fn collect(iter: &mut dyn RowBatchIterator) -> Result<Vec<RecordBatch>> {
    let mut batches = Vec::new();
    while let Some(batch) = iter.next_batch()? {
        batches.push(batch);
    }
    Ok(batches)
}

/// Drain a stream into a single batch.
pub fn collect_batch(iter: &mut dyn RowBatchIterator) -> Result<RecordBatch> {
    let schema = iter.schema();
    let batches = collect(iter)?;
    Ok(arrow::compute::concat_batches(&schema, &batches)?)
}

/// Stream over batches already in memory.
pub struct MemoryStream {
    schema: SchemaRef,
    batches: std::vec::IntoIter<RecordBatch>,
}

impl MemoryStream {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self {
            schema,
            batches: batches.into_iter(),
        }
    }
}

impl RowBatchIterator for MemoryStream {
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.batches.next())
    }
}
