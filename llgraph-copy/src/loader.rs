//! Bulk copy from a batch stream into a persisted table.
//!
//! A copy moves through `Validating -> Reading -> Writing -> Committed` and
//! ends in `Aborted` on any failure. Options, column mapping and column types
//! are checked before the writer lease is taken, so validation failures have
//! no side effects. Rows are staged in a table writer and published by a
//! single commit; dropping the writer discards them.

use std::fmt;

use arrow::array::ArrayRef;
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use llgraph_result::{Error, Result};
use llgraph_scan::RowBatchIterator;
use llgraph_storage::{
    AppendOutcome, NodeTable, NodeTableWriter, PersistedTable, RelTable, RelTableWriter,
    RowFailure,
};
use llgraph_types::{ColumnDescriptor, LogicalType, TypeCoercionMapper};

use crate::cancel::CancellationToken;
use crate::options::{CopyOptions, OptionValidator, SourceKind, ValidatedOptions};
use crate::policy::{ErrorPolicy, RowFailureAction};
use crate::warnings::WarningSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Validating,
    Reading,
    Writing,
    Committed,
    Aborted,
}

impl fmt::Display for CopyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CopyState::Validating => "validating",
            CopyState::Reading => "reading",
            CopyState::Writing => "writing",
            CopyState::Committed => "committed",
            CopyState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Outcome of a committed copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySummary {
    pub rows_committed: u64,
    pub rows_skipped: u64,
    /// Warnings this statement recorded in the sink.
    pub warnings: usize,
    /// The copy stopped early on a cancellation request.
    pub cancelled: bool,
    pub state: CopyState,
}

/// Per-statement collaborators of a copy.
pub struct CopyContext<'a> {
    pub statement_id: u64,
    pub warnings: &'a mut WarningSink,
    pub cancel: &'a CancellationToken,
}

/// A source column feeding one target column.
#[derive(Debug, Clone, Copy)]
struct ColumnBinding {
    source: usize,
    target: LogicalType,
}

impl ColumnBinding {
    fn read(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        TypeCoercionMapper::to_storage(batch.column(self.source), self.target)
    }
}

enum StagingWriter {
    Node {
        writer: NodeTableWriter,
        columns: Vec<ColumnBinding>,
    },
    Rel {
        writer: RelTableWriter,
        from: ColumnBinding,
        to: ColumnBinding,
        properties: Vec<ColumnBinding>,
    },
}

impl StagingWriter {
    fn append(
        &mut self,
        batch: &RecordBatch,
        on_failure: &mut dyn FnMut(RowFailure) -> Result<()>,
    ) -> Result<AppendOutcome> {
        match self {
            StagingWriter::Node { writer, columns } => {
                let arrays = read_columns(batch, columns)?;
                writer.append(&arrays, on_failure)
            }
            StagingWriter::Rel {
                writer,
                from,
                to,
                properties,
            } => {
                let src = from.read(batch)?;
                let dst = to.read(batch)?;
                let arrays = read_columns(batch, properties)?;
                writer.append(&src, &dst, &arrays, on_failure)
            }
        }
    }

    fn commit(self) -> Result<u64> {
        match self {
            StagingWriter::Node { writer, .. } => writer.commit(),
            StagingWriter::Rel { writer, .. } => writer.commit(),
        }
    }
}

fn read_columns(batch: &RecordBatch, bindings: &[ColumnBinding]) -> Result<Vec<ArrayRef>> {
    bindings.iter().map(|b| b.read(batch)).collect()
}

/// Copies one source into one persisted table.
pub struct BulkCopyLoader {
    target: PersistedTable,
    kind: SourceKind,
    options: ValidatedOptions,
    policy: ErrorPolicy,
    /// Selected FROM/TO pair for relationship targets.
    pair: usize,
    /// Source columns holding the endpoint keys, when they are known by name.
    endpoints: Option<(String, String)>,
    state: CopyState,
}

impl BulkCopyLoader {
    /// Validate `options` for a copy of a `kind` source into `target`.
    pub fn new(target: PersistedTable, kind: SourceKind, options: &CopyOptions) -> Result<Self> {
        let options = OptionValidator::validate(kind, options)?;
        let pair = match &target {
            PersistedTable::Node(table) => {
                if options.from.is_some() || options.to.is_some() {
                    return Err(Error::InvalidOption(format!(
                        "FROM and TO options are only valid for relationship tables, but {} is a node table.",
                        table.name()
                    )));
                }
                0
            }
            PersistedTable::Rel(table) => select_pair(table, &options)?,
        };
        Ok(Self {
            target,
            kind,
            policy: ErrorPolicy::new(options.ignore_errors),
            options,
            pair,
            endpoints: None,
            state: CopyState::Validating,
        })
    }

    /// Read relationship endpoint keys from the named source columns instead
    /// of `from`/`to` or the first two columns.
    pub fn with_endpoint_columns(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.endpoints = Some((from.into(), to.into()));
        self
    }

    pub fn options(&self) -> &ValidatedOptions {
        &self.options
    }

    pub fn state(&self) -> CopyState {
        self.state
    }

    pub fn target_name(&self) -> &str {
        match &self.target {
            PersistedTable::Node(table) => table.name(),
            PersistedTable::Rel(table) => table.name(),
        }
    }

    /// Columns a positional source must provide, as `(name, storage type)`.
    ///
    /// Relationship targets expect `from` and `to` keys first, typed like the
    /// primary keys of the selected pair's node tables.
    pub fn source_layout(&self) -> Vec<(String, DataType)> {
        match &self.target {
            PersistedTable::Node(table) => table
                .columns()
                .iter()
                .map(|c| (c.name.clone(), c.logical_type.storage_type()))
                .collect(),
            PersistedTable::Rel(table) => {
                let pair = &table.pairs()[self.pair];
                let mut layout = vec![
                    (
                        "from".to_string(),
                        pair.from.primary_key().logical_type.storage_type(),
                    ),
                    (
                        "to".to_string(),
                        pair.to.primary_key().logical_type.storage_type(),
                    ),
                ];
                layout.extend(
                    table
                        .properties()
                        .iter()
                        .map(|c| (c.name.clone(), c.logical_type.storage_type())),
                );
                layout
            }
        }
    }

    /// Run the copy to completion.
    ///
    /// On error the target is left exactly as it was and the loader ends in
    /// [`CopyState::Aborted`].
    pub fn run(
        &mut self,
        source: &mut dyn RowBatchIterator,
        ctx: CopyContext<'_>,
    ) -> Result<CopySummary> {
        let result = self.execute(source, ctx);
        if let Err(err) = &result {
            self.state = CopyState::Aborted;
            tracing::debug!(
                "[COPY] copy of {} source into '{}' aborted: {err}",
                self.kind,
                self.target_name()
            );
        }
        result
    }

    fn execute(
        &mut self,
        source: &mut dyn RowBatchIterator,
        ctx: CopyContext<'_>,
    ) -> Result<CopySummary> {
        let CopyContext {
            statement_id,
            warnings: sink,
            cancel,
        } = ctx;
        self.state = CopyState::Validating;
        let mut staging = self.bind(&source.schema())?;
        tracing::debug!(
            "[COPY] copying {} source into '{}' (ignore_errors={})",
            self.kind,
            self.target_name(),
            self.policy.ignore_errors()
        );

        let policy = self.policy;
        let mut rows_read: u64 = 0;
        let mut rows_skipped: u64 = 0;
        let mut warnings = 0usize;
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.state = CopyState::Reading;
            let Some(batch) = source.next_batch()? else {
                break;
            };
            if batch.num_rows() == 0 {
                continue;
            }
            self.state = CopyState::Writing;
            let base_row = rows_read;
            let mut on_failure = |failure: RowFailure| -> Result<()> {
                match policy.on_row_failure(&failure.error) {
                    RowFailureAction::Skip => {
                        let row = base_row + failure.row as u64;
                        tracing::trace!("[COPY] skipping source row {row}: {}", failure.error);
                        if sink.append(statement_id, failure.error.to_string(), Some(row)) {
                            warnings += 1;
                        }
                        Ok(())
                    }
                    RowFailureAction::Abort => Err(Error::RowIntegrity(failure.error)),
                }
            };
            let outcome = staging.append(&batch, &mut on_failure)?;
            rows_skipped += outcome.rejected as u64;
            rows_read += batch.num_rows() as u64;
        }

        if cancelled {
            if !policy.ignore_errors() {
                return Err(Error::Cancelled(format!(
                    "copy into '{}' was cancelled",
                    self.target_name()
                )));
            }
            let message = format!(
                "Copy into '{}' was cancelled after {rows_read} rows; rows read before the cancellation were committed.",
                self.target_name()
            );
            if sink.append(statement_id, message, None) {
                warnings += 1;
            }
        }

        let rows_committed = staging.commit()?;
        self.state = CopyState::Committed;
        tracing::debug!(
            "[COPY] '{}' committed {rows_committed} rows, skipped {rows_skipped}{}",
            self.target_name(),
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(CopySummary {
            rows_committed,
            rows_skipped,
            warnings,
            cancelled,
            state: self.state,
        })
    }

    /// Map source columns onto the target, check their types and take the
    /// writer lease.
    fn bind(&self, schema: &Schema) -> Result<StagingWriter> {
        match &self.target {
            PersistedTable::Node(table) => {
                let columns = bind_node_columns(table, schema)?;
                Ok(StagingWriter::Node {
                    writer: table.begin_write()?,
                    columns,
                })
            }
            PersistedTable::Rel(table) => {
                let (from, to, properties) =
                    bind_rel_columns(table, self.pair, self.endpoints.as_ref(), schema)?;
                Ok(StagingWriter::Rel {
                    writer: table.begin_write(self.pair)?,
                    from,
                    to,
                    properties,
                })
            }
        }
    }
}

fn select_pair(table: &RelTable, options: &ValidatedOptions) -> Result<usize> {
    match (&options.from, &options.to) {
        (Some(from), Some(to)) => table.pair_index(from, to).ok_or_else(|| {
            Error::CatalogResolution(format!(
                "Relationship table {} has no FROM {from} TO {to} pair.",
                table.name()
            ))
        }),
        (None, None) if table.pairs().len() == 1 => Ok(0),
        (None, None) => Err(Error::InvalidOption(format!(
            "The table {name} has multiple FROM and TO pairs defined in the schema. A specific pair of FROM and TO options is expected when copying data into the {name} table.",
            name = table.name()
        ))),
        _ => Err(Error::InvalidOption(
            "FROM and TO options must be given together.".into(),
        )),
    }
}

fn bind_node_columns(table: &NodeTable, schema: &Schema) -> Result<Vec<ColumnBinding>> {
    let indices: Vec<usize> = (0..schema.fields().len()).collect();
    let sources = map_columns(table.columns(), schema, &indices)?;
    sources
        .into_iter()
        .zip(table.columns())
        .map(|(source, column)| bind_column(schema, source, column))
        .collect()
}

fn bind_rel_columns(
    table: &RelTable,
    pair: usize,
    endpoints: Option<&(String, String)>,
    schema: &Schema,
) -> Result<(ColumnBinding, ColumnBinding, Vec<ColumnBinding>)> {
    let find = |name: &str| {
        schema.index_of(name).map_err(|_| {
            Error::InvalidArgumentError(format!(
                "Endpoint column {name} not found in the copy source."
            ))
        })
    };
    let (from_idx, to_idx) = match endpoints {
        Some((from, to)) => (find(from)?, find(to)?),
        None => match (schema.index_of("from"), schema.index_of("to")) {
            (Ok(from), Ok(to)) => (from, to),
            _ if schema.fields().len() >= 2 => (0, 1),
            _ => {
                return Err(Error::InvalidArgumentError(format!(
                    "Copying into relationship table {} requires at least two source columns, got {}.",
                    table.name(),
                    schema.fields().len()
                )));
            }
        },
    };
    let selected = &table.pairs()[pair];
    let from = bind_column(schema, from_idx, selected.from.primary_key())?;
    let to = bind_column(schema, to_idx, selected.to.primary_key())?;

    let remaining: Vec<usize> = (0..schema.fields().len())
        .filter(|idx| *idx != from_idx && *idx != to_idx)
        .collect();
    let sources = map_columns(table.properties(), schema, &remaining)?;
    let properties = sources
        .into_iter()
        .zip(table.properties())
        .map(|(source, column)| bind_column(schema, source, column))
        .collect::<Result<Vec<_>>>()?;
    Ok((from, to, properties))
}

/// Pick a source column for every target column: by name when every target
/// name is among `candidates`, otherwise by position when the counts match.
fn map_columns(
    targets: &[ColumnDescriptor],
    schema: &Schema,
    candidates: &[usize],
) -> Result<Vec<usize>> {
    let by_name: Option<Vec<usize>> = targets
        .iter()
        .map(|target| {
            candidates
                .iter()
                .copied()
                .find(|idx| schema.field(*idx).name() == &target.name)
        })
        .collect();
    if let Some(indices) = by_name {
        return Ok(indices);
    }
    if candidates.len() == targets.len() {
        return Ok(candidates.to_vec());
    }
    Err(Error::InvalidArgumentError(format!(
        "Number of columns mismatch. Expected {} but got {}.",
        targets.len(),
        candidates.len()
    )))
}

fn bind_column(schema: &Schema, source: usize, target: &ColumnDescriptor) -> Result<ColumnBinding> {
    let field = schema.field(source);
    TypeCoercionMapper::coerce_for_copy(field.data_type(), target.logical_type, field.name())?;
    Ok(ColumnBinding {
        source,
        target: target.logical_type,
    })
}

/// Convenience for callers holding the target by value.
pub fn copy_into(
    target: PersistedTable,
    kind: SourceKind,
    options: &CopyOptions,
    source: &mut dyn RowBatchIterator,
    ctx: CopyContext<'_>,
) -> Result<CopySummary> {
    BulkCopyLoader::new(target, kind, options)?.run(source, ctx)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use arrow::array::{Array, Int32Array, Int64Array, StringArray};
    use llgraph_scan::MemoryStream;
    use llgraph_storage::StorageManager;
    use llgraph_test_utils::batch;

    fn stream(batches: Vec<RecordBatch>) -> MemoryStream {
        MemoryStream::new(batches[0].schema(), batches)
    }

    fn ids_table(storage: &StorageManager) -> Arc<NodeTable> {
        storage
            .create_node_table(
                "ids",
                vec![ColumnDescriptor::new("id", LogicalType::Int64)],
                "id",
            )
            .unwrap()
    }

    #[test]
    fn positional_mapping_when_names_differ() {
        let storage = StorageManager::default();
        let table = ids_table(&storage);
        let mut source = stream(vec![batch(vec![(
            "key",
            Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef,
        )])]);
        let mut sink = WarningSink::default();
        let cancel = CancellationToken::new();
        let summary = copy_into(
            PersistedTable::Node(Arc::clone(&table)),
            SourceKind::Arrow,
            &CopyOptions::new(),
            &mut source,
            CopyContext {
                statement_id: 1,
                warnings: &mut sink,
                cancel: &cancel,
            },
        )
        .unwrap();
        assert_eq!(summary.rows_committed, 2);
        assert_eq!(summary.state, CopyState::Committed);
        let data = table.data().unwrap();
        let ids = data.batches()[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ids.values().to_vec(), vec![1, 2]);
    }

    #[test]
    fn column_count_mismatch_fails_before_writing() {
        let storage = StorageManager::default();
        let table = ids_table(&storage);
        let mut source = stream(vec![batch(vec![
            ("a", Arc::new(Int64Array::from(vec![1])) as ArrayRef),
            ("b", Arc::new(StringArray::from(vec!["x"])) as ArrayRef),
        ])]);
        let mut loader = BulkCopyLoader::new(
            PersistedTable::Node(Arc::clone(&table)),
            SourceKind::Arrow,
            &CopyOptions::new(),
        )
        .unwrap();
        let mut sink = WarningSink::default();
        let cancel = CancellationToken::new();
        let err = loader
            .run(
                &mut source,
                CopyContext {
                    statement_id: 1,
                    warnings: &mut sink,
                    cancel: &cancel,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("Expected 1 but got 2"));
        assert_eq!(loader.state(), CopyState::Aborted);
        // The lease was never taken.
        assert!(table.begin_write().is_ok());
    }

    #[test]
    fn from_to_rejected_for_node_targets() {
        let storage = StorageManager::default();
        let table = ids_table(&storage);
        let options = CopyOptions::new().with("FROM", "a").with("TO", "b");
        let err =
            BulkCopyLoader::new(PersistedTable::Node(table), SourceKind::Arrow, &options)
                .err()
                .unwrap();
        assert!(matches!(err, Error::InvalidOption(_)));
    }

    #[test]
    fn layout_of_relationship_targets() {
        let storage = StorageManager::default();
        storage
            .create_node_table(
                "user",
                vec![ColumnDescriptor::new("name", LogicalType::String)],
                "name",
            )
            .unwrap();
        let rel = storage
            .create_rel_table(
                "follows",
                &[("user", "user")],
                vec![ColumnDescriptor::new("since", LogicalType::Int64)],
            )
            .unwrap();
        let loader =
            BulkCopyLoader::new(PersistedTable::Rel(rel), SourceKind::Csv, &CopyOptions::new())
                .unwrap();
        assert_eq!(
            loader.source_layout(),
            vec![
                ("from".to_string(), DataType::Utf8),
                ("to".to_string(), DataType::Utf8),
                ("since".to_string(), DataType::Int64),
            ]
        );
    }
}
