//! Host-owned data handed to the database.

use std::fmt;

use arrow::datatypes::SchemaRef;
use arrow::ffi_stream::{ArrowArrayStreamReader, FFI_ArrowArrayStream};
use arrow::record_batch::{RecordBatch, RecordBatchIterator, RecordBatchReader};
use llgraph_result::{Error, Result};
use llgraph_types::Value;

use crate::DataFrame;

/// Shapes a foreign handle may take besides a plain value.
pub const SCANNABLE_SHAPES: &str = "arrow tables, arrow record batch streams and data frames";

/// Callback fired once the database no longer references host memory.
pub type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// Owns a host release hook and fires it when dropped.
///
/// A handle rejected before the database retains it drops its guard with
/// it, so the host gets its memory back on every path.
pub struct ReleaseGuard(Option<ReleaseHook>);

impl ReleaseGuard {
    pub fn new(hook: Option<ReleaseHook>) -> Self {
        Self(hook)
    }

    /// Whether a hook is still waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(hook) = self.0.take() {
            hook();
        }
    }
}

/// Boxed reader yielding foreign batches.
pub type BoxedBatchReader = Box<dyn RecordBatchReader + Send>;

/// What a [`ForeignHandle`] wraps.
pub enum HandleData {
    /// A fully materialised Arrow table.
    Table {
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    },
    /// A lazy record batch reader.
    Reader(BoxedBatchReader),
    /// An exported Arrow C stream.
    CStream(FFI_ArrowArrayStream),
    DataFrame(DataFrame),
    /// Any other host value. Never scannable.
    Value(Value),
}

/// Broad category of a handle, used to select option sets and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Arrow,
    DataFrame,
    Unsupported,
}

/// Host data plus the hook telling the host when it may free that data.
pub struct ForeignHandle {
    data: HandleData,
    release: ReleaseGuard,
}

impl fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match &self.data {
            HandleData::Table { batches, .. } => format!("Table({} batches)", batches.len()),
            HandleData::Reader(_) => "Reader".to_string(),
            HandleData::CStream(_) => "CStream".to_string(),
            HandleData::DataFrame(df) => format!("DataFrame({} rows)", df.num_rows()),
            HandleData::Value(v) => format!("Value({})", v.type_name()),
        };
        f.debug_struct("ForeignHandle")
            .field("data", &shape)
            .field("release_hook", &self.release.is_armed())
            .finish()
    }
}

impl ForeignHandle {
    fn new(data: HandleData) -> Self {
        Self {
            data,
            release: ReleaseGuard::new(None),
        }
    }

    pub fn from_batches(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self::new(HandleData::Table { schema, batches })
    }

    pub fn from_record_batch(batch: RecordBatch) -> Self {
        Self::from_batches(batch.schema(), vec![batch])
    }

    pub fn from_reader(reader: BoxedBatchReader) -> Self {
        Self::new(HandleData::Reader(reader))
    }

    pub fn from_c_stream(stream: FFI_ArrowArrayStream) -> Self {
        Self::new(HandleData::CStream(stream))
    }

    pub fn from_data_frame(df: DataFrame) -> Self {
        Self::new(HandleData::DataFrame(df))
    }

    pub fn from_value(value: impl Into<Value>) -> Self {
        Self::new(HandleData::Value(value.into()))
    }

    /// Attach a hook fired after the last internal reference to this data
    /// is gone.
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = ReleaseGuard::new(Some(Box::new(hook)));
        self
    }

    pub fn kind(&self) -> HandleKind {
        match &self.data {
            HandleData::Table { .. } | HandleData::Reader(_) | HandleData::CStream(_) => {
                HandleKind::Arrow
            }
            HandleData::DataFrame(_) => HandleKind::DataFrame,
            HandleData::Value(_) => HandleKind::Unsupported,
        }
    }

    /// Turn the handle into a batch reader plus its release guard.
    ///
    /// On error the guard is dropped here and the hook fires.
    pub fn into_reader(self) -> Result<(BoxedBatchReader, ReleaseGuard)> {
        let release = self.release;
        let reader: BoxedBatchReader = match self.data {
            HandleData::Table { schema, batches } => Box::new(RecordBatchIterator::new(
                batches.into_iter().map(Ok),
                schema,
            )),
            HandleData::Reader(reader) => reader,
            HandleData::CStream(stream) => Box::new(ArrowArrayStreamReader::try_new(stream)?),
            HandleData::DataFrame(df) => {
                let batch = df.to_record_batch()?;
                let schema = batch.schema();
                Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema))
            }
            HandleData::Value(value) => {
                return Err(Error::unsupported_source_type(
                    value.type_name(),
                    SCANNABLE_SHAPES,
                ));
            }
        };
        Ok((reader, release))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn plain_values_are_not_scannable() {
        let handle = ForeignHandle::from_value(vec![1, 2, 3]);
        assert_eq!(handle.kind(), HandleKind::Unsupported);
        let err = handle.into_reader().err().expect("list is unsupported");
        assert_eq!(
            err.to_string(),
            "Binder exception: Trying to scan from unsupported data type INT64[]. \
             The only parameter types that can be scanned from are arrow tables, \
             arrow record batch streams and data frames."
        );
    }

    #[test]
    fn dropped_handle_fires_its_hook_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let handle = ForeignHandle::from_value(Value::Int(1)).with_release_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.into_reader().is_err());
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&released);
        drop(ForeignHandle::from_value(Value::Int(2)).with_release_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }
}
