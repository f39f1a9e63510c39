//! Foreign columnar sources and their lifetime tracking.
//!
//! A [`ForeignColumnarSource`] wraps host batches behind a shared lifetime.
//! The host's release hook runs when the last [`LifetimeToken`] drops: the
//! source itself holds one, every open [`SourceCursor`] holds one, and callers
//! may take more with [`ForeignColumnarSource::keep_alive`].

use std::fmt;
use std::sync::{Arc, Mutex};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use llgraph_result::{Error, Result};
use llgraph_types::{ColumnDescriptor, SourceId, describe_schema};

use crate::handle::{BoxedBatchReader, ForeignHandle, ReleaseGuard};

struct HostLifetime {
    label: String,
    release: ReleaseGuard,
}

impl Drop for HostLifetime {
    fn drop(&mut self) {
        // The guard fires the hook once this struct's fields drop.
        if self.release.is_armed() {
            tracing::debug!("[FOREIGN] releasing host buffers of {}", self.label);
        }
    }
}

/// A retaining reference to host memory.
#[derive(Clone)]
pub struct LifetimeToken(Arc<HostLifetime>);

impl fmt::Debug for LifetimeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LifetimeToken").field(&self.0.label).finish()
    }
}

impl LifetimeToken {
    fn new(label: String, release: ReleaseGuard) -> Self {
        Self(Arc::new(HostLifetime { label, release }))
    }

    /// Number of live references, this one included.
    pub fn references(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Drop this reference and report whether host memory went with it.
    pub fn release(self) -> CloseOutcome {
        let outstanding = Arc::strong_count(&self.0) - 1;
        drop(self);
        if outstanding == 0 {
            CloseOutcome::Released
        } else {
            CloseOutcome::Deferred { outstanding }
        }
    }
}

/// Result of closing a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Host memory was released now (or had been already).
    Released,
    /// Other references (usually in-flight scans) still hold host memory.
    Deferred { outstanding: usize },
}

enum SourceState {
    Retained {
        batches: Arc<[RecordBatch]>,
        lifetime: LifetimeToken,
    },
    Streaming {
        reader: BoxedBatchReader,
        lifetime: LifetimeToken,
    },
    Consumed,
    Closed,
}

/// Columnar data owned by the host, described with internal column types.
pub struct ForeignColumnarSource {
    id: Option<SourceId>,
    schema: SchemaRef,
    descriptors: Vec<ColumnDescriptor>,
    state: Mutex<SourceState>,
}

impl fmt::Debug for ForeignColumnarSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignColumnarSource")
            .field("id", &self.id)
            .field("columns", &self.descriptors.len())
            .finish()
    }
}

impl ForeignColumnarSource {
    /// Retain a handle for registration.
    ///
    /// Streams are drained into memory so that every later scan can start
    /// from the first batch. Every batch must share the schema of the first.
    pub fn retain(handle: ForeignHandle, id: SourceId) -> Result<Self> {
        let (reader, release) = handle.into_reader()?;
        let lifetime = LifetimeToken::new(id.to_string(), release);
        let schema = reader.schema();
        let descriptors = describe_schema(&schema, "scan")?;
        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch?;
            check_batch_schema(&schema, &batch)?;
            batches.push(batch);
        }
        tracing::debug!(
            "[FOREIGN] retained {} with {} batches ({} columns)",
            id,
            batches.len(),
            descriptors.len()
        );
        Ok(Self {
            id: Some(id),
            schema,
            descriptors,
            state: Mutex::new(SourceState::Retained {
                batches: batches.into(),
                lifetime,
            }),
        })
    }

    /// Wrap a handle for a single pass, without materialising streams.
    pub fn from_handle(handle: ForeignHandle) -> Result<Self> {
        let (reader, release) = handle.into_reader()?;
        let lifetime = LifetimeToken::new("ad-hoc source".to_string(), release);
        let schema = reader.schema();
        let descriptors = describe_schema(&schema, "scan")?;
        Ok(Self {
            id: None,
            schema,
            descriptors,
            state: Mutex::new(SourceState::Streaming {
                reader,
                lifetime,
            }),
        })
    }

    pub fn id(&self) -> Option<SourceId> {
        self.id
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn descriptors(&self) -> &[ColumnDescriptor] {
        &self.descriptors
    }

    /// Position of the column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.descriptors.iter().position(|c| c.name == name)
    }

    /// Open a private cursor over the batches in source order.
    ///
    /// Retained sources can be opened any number of times. A streaming
    /// source can be opened once.
    pub fn open_scan(&self) -> Result<SourceCursor> {
        let mut state = self.lock_state()?;
        let cursor = match std::mem::replace(&mut *state, SourceState::Consumed) {
            SourceState::Retained { batches, lifetime } => {
                let cursor = SourceCursor {
                    schema: self.schema(),
                    batches: CursorBatches::Retained {
                        batches: Arc::clone(&batches),
                        next: 0,
                    },
                    _lifetime: lifetime.clone(),
                };
                *state = SourceState::Retained { batches, lifetime };
                cursor
            }
            SourceState::Streaming { reader, lifetime } => SourceCursor {
                schema: self.schema(),
                batches: CursorBatches::Stream(reader),
                _lifetime: lifetime,
            },
            SourceState::Consumed => {
                return Err(Error::InvalidArgumentError(
                    "foreign stream has already been consumed".into(),
                ));
            }
            SourceState::Closed => {
                *state = SourceState::Closed;
                return Err(Error::InvalidArgumentError(
                    "foreign source has been closed".into(),
                ));
            }
        };
        Ok(cursor)
    }

    /// Committed batches of a retained source.
    pub fn retained_batches(&self) -> Result<Arc<[RecordBatch]>> {
        match &*self.lock_state()? {
            SourceState::Retained { batches, .. } => Ok(Arc::clone(batches)),
            _ => Err(Error::InvalidArgumentError(
                "foreign source is not retained".into(),
            )),
        }
    }

    /// Take an additional reference keeping the host memory alive.
    pub fn keep_alive(&self) -> Result<LifetimeToken> {
        match &*self.lock_state()? {
            SourceState::Retained { lifetime, .. } | SourceState::Streaming { lifetime, .. } => {
                Ok(lifetime.clone())
            }
            _ => Err(Error::InvalidArgumentError(
                "foreign source no longer holds host memory".into(),
            )),
        }
    }

    /// Release the reference held by the source itself.
    ///
    /// Closing twice is a no-op reporting [`CloseOutcome::Released`].
    pub fn close(&self) -> Result<CloseOutcome> {
        let previous = std::mem::replace(&mut *self.lock_state()?, SourceState::Closed);
        let outcome = match previous {
            SourceState::Retained { batches, lifetime } => {
                drop(batches);
                lifetime.release()
            }
            SourceState::Streaming { reader, lifetime } => {
                drop(reader);
                lifetime.release()
            }
            SourceState::Consumed | SourceState::Closed => CloseOutcome::Released,
        };
        tracing::trace!("[FOREIGN] closed {:?}: {:?}", self.id, outcome);
        Ok(outcome)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, SourceState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire foreign source lock".to_string()))
    }
}

enum CursorBatches {
    Retained {
        batches: Arc<[RecordBatch]>,
        next: usize,
    },
    Stream(BoxedBatchReader),
}

/// Private iterator over one pass of a source.
pub struct SourceCursor {
    schema: SchemaRef,
    batches: CursorBatches,
    _lifetime: LifetimeToken,
}

impl SourceCursor {
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Next batch, `None` at the end.
    pub fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        match &mut self.batches {
            CursorBatches::Retained { batches, next } => {
                let batch = batches.get(*next).cloned();
                if batch.is_some() {
                    *next += 1;
                }
                Ok(batch)
            }
            CursorBatches::Stream(reader) => match reader.next() {
                None => Ok(None),
                Some(batch) => {
                    let batch = batch?;
                    check_batch_schema(&self.schema, &batch)?;
                    Ok(Some(batch))
                }
            },
        }
    }
}

fn check_batch_schema(schema: &SchemaRef, batch: &RecordBatch) -> Result<()> {
    let actual = batch.schema();
    let matches = actual.fields().len() == schema.fields().len()
        && actual
            .fields()
            .iter()
            .zip(schema.fields().iter())
            .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type());
    if matches {
        Ok(())
    } else {
        Err(Error::InvalidArgumentError(
            "foreign batch schema differs from the schema of its source".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids_batch(values: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let col: ArrayRef = Arc::new(Int64Array::from(values));
        RecordBatch::try_new(schema, vec![col]).unwrap()
    }

    #[test]
    fn release_waits_for_open_cursors() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let handle = ForeignHandle::from_record_batch(ids_batch(vec![1, 2]))
            .with_release_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let source = ForeignColumnarSource::retain(handle, SourceId(0)).unwrap();
        let mut cursor = source.open_scan().unwrap();

        assert_eq!(
            source.close().unwrap(),
            CloseOutcome::Deferred { outstanding: 1 }
        );
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(cursor.next_batch().unwrap().unwrap().num_rows(), 2);
        assert!(cursor.next_batch().unwrap().is_none());
        drop(cursor);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(source.close().unwrap(), CloseOutcome::Released);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retained_sources_restart_and_streams_do_not() {
        let batch = ids_batch(vec![1]);
        let retained =
            ForeignColumnarSource::retain(ForeignHandle::from_record_batch(batch.clone()), SourceId(1))
                .unwrap();
        for _ in 0..2 {
            let mut cursor = retained.open_scan().unwrap();
            assert!(cursor.next_batch().unwrap().is_some());
        }

        let streaming =
            ForeignColumnarSource::from_handle(ForeignHandle::from_record_batch(batch)).unwrap();
        assert!(streaming.open_scan().is_ok());
        assert!(streaming.open_scan().is_err());
    }

    #[test]
    fn mismatched_batches_are_rejected() {
        let other_schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, true)]));
        let other = RecordBatch::new_empty(other_schema);
        let first = ids_batch(vec![1]);
        let handle = ForeignHandle::from_batches(first.schema(), vec![first, other]);
        assert!(ForeignColumnarSource::retain(handle, SourceId(2)).is_err());
    }
}
