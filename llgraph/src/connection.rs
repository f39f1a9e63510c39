//! Statement entry points of a database connection.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arrow::array::{ArrayRef, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use llgraph_copy::{
    BulkCopyLoader, CancellationToken, CopyContext, CopyOptions, CopySummary, CsvReader,
    OptionValue, SourceKind, Warning, WarningSink, open_handle,
};
use llgraph_foreign::{CloseOutcome, ForeignHandle, RelEndpoints, VirtualTableKind};
use llgraph_result::{Error, Result};
use llgraph_scan::{
    BoxedRowIterator, PersistedNodeScan, PersistedRelScan, RowBatchIterator, ScanSource,
    VirtualNodeScan, VirtualRelScan,
};
use llgraph_storage::PersistedTable;
use llgraph_types::{ColumnDescriptor, SourceId};

use crate::config::ConnectionConfig;
use crate::database::Database;

/// Where a copy statement reads its rows from.
pub enum CopySource {
    /// An ad-hoc host handle, read once.
    Handle(ForeignHandle),
    /// A registered virtual table, read with its original column types.
    /// Relationship tables supply their registered endpoint columns.
    VirtualTable(String),
    Csv(PathBuf),
    /// The output of an upstream query.
    Query(BoxedRowIterator),
}

impl fmt::Debug for CopySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopySource::Handle(_) => f.write_str("Handle"),
            CopySource::VirtualTable(name) => f.debug_tuple("VirtualTable").field(name).finish(),
            CopySource::Csv(path) => f.debug_tuple("Csv").field(path).finish(),
            CopySource::Query(_) => f.write_str("Query"),
        }
    }
}

/// `COPY <target> FROM <source> (<options>)`.
#[derive(Debug)]
pub struct CopyStatement {
    pub target: String,
    pub source: CopySource,
    pub options: CopyOptions,
}

impl CopyStatement {
    pub fn new(target: impl Into<String>, source: CopySource) -> Self {
        Self {
            target: target.into(),
            source,
            options: CopyOptions::new(),
        }
    }

    pub fn with_option(mut self, name: &str, value: impl Into<OptionValue>) -> Self {
        self.options.set(name, value);
        self
    }
}

/// A session on a [`Database`].
///
/// Each connection owns its warning sink and cancellation token. Every
/// statement gets a fresh id, which scopes the warnings it records.
pub struct Connection {
    db: Database,
    id: u64,
    config: ConnectionConfig,
    warnings: Mutex<WarningSink>,
    cancel: CancellationToken,
    next_statement: AtomicU64,
}

impl Connection {
    pub(crate) fn new(db: Database, id: u64, config: ConnectionConfig) -> Self {
        let warnings = Mutex::new(WarningSink::new(config.warning_limit));
        Self {
            db,
            id,
            config,
            warnings,
            cancel: CancellationToken::new(),
            next_statement: AtomicU64::new(1),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn begin_statement(&self) -> u64 {
        self.next_statement.fetch_add(1, Ordering::Relaxed)
    }

    pub fn create_node_table(
        &self,
        name: &str,
        columns: Vec<ColumnDescriptor>,
        primary_key: &str,
    ) -> Result<()> {
        let _ddl = self.db.ddl_lock()?;
        self.db.ensure_name_free(name)?;
        self.db
            .storage()
            .create_node_table(name, columns, primary_key)?;
        Ok(())
    }

    pub fn create_rel_table(
        &self,
        name: &str,
        pairs: &[(&str, &str)],
        properties: Vec<ColumnDescriptor>,
    ) -> Result<()> {
        let _ddl = self.db.ddl_lock()?;
        self.db.ensure_name_free(name)?;
        self.db
            .storage()
            .create_rel_table(name, pairs, properties)?;
        Ok(())
    }

    /// Expose `handle` as a virtual node table keyed by its first column.
    pub fn register_node_source(&self, name: &str, handle: ForeignHandle) -> Result<SourceId> {
        let _ddl = self.db.ddl_lock()?;
        self.db.ensure_name_free(name)?;
        let id = self.db.catalog().register_node(name, handle)?;
        tracing::debug!("[CATALOG] connection {} registered node source '{name}' as {id}", self.id);
        Ok(id)
    }

    /// Expose `handle` as a virtual relationship table. Endpoint keys are
    /// read from `from`/`to` columns, or the first two columns.
    pub fn register_rel_source(
        &self,
        name: &str,
        handle: ForeignHandle,
        from_table: &str,
        to_table: &str,
    ) -> Result<SourceId> {
        self.register_rel(name, handle, RelEndpoints::new(from_table, to_table))
    }

    pub fn register_rel_source_with_endpoints(
        &self,
        name: &str,
        handle: ForeignHandle,
        from_table: &str,
        to_table: &str,
        from_column: &str,
        to_column: &str,
    ) -> Result<SourceId> {
        self.register_rel(
            name,
            handle,
            RelEndpoints::new(from_table, to_table).with_columns(from_column, to_column),
        )
    }

    fn register_rel(
        &self,
        name: &str,
        handle: ForeignHandle,
        endpoints: RelEndpoints,
    ) -> Result<SourceId> {
        let _ddl = self.db.ddl_lock()?;
        self.db.ensure_name_free(name)?;
        let id = self
            .db
            .catalog()
            .register_rel(name, handle, &endpoints, self.db.storage())?;
        tracing::debug!(
            "[CATALOG] connection {} registered relationship source '{name}' ({} -> {}) as {id}",
            self.id,
            endpoints.from_table,
            endpoints.to_table
        );
        Ok(id)
    }

    /// Drop a virtual table. Host memory is released once no scan over it
    /// is still open.
    pub fn unregister(&self, name: &str) -> Result<CloseOutcome> {
        let _ddl = self.db.ddl_lock()?;
        if self.db.storage().contains(name)? && !self.db.catalog().contains(name)? {
            return Err(Error::CatalogError(format!(
                "Table {name} is not a virtual table."
            )));
        }
        self.db.catalog().unregister(name)
    }

    /// Open a scan of any table by name.
    pub fn scan(&self, name: &str) -> Result<Box<dyn RowBatchIterator + Send>> {
        let source = self.scan_source(name)?;
        source.open_scan(&self.db.config().scan_options())
    }

    /// Resolve `name` to its scan source, virtual tables first.
    pub fn scan_source(&self, name: &str) -> Result<Box<dyn ScanSource>> {
        if let Some(entry) = self.db.catalog().lookup(name)? {
            let source: Box<dyn ScanSource> = if entry.is_node() {
                Box::new(VirtualNodeScan::try_new(entry)?)
            } else {
                Box::new(VirtualRelScan::try_new(entry)?)
            };
            return Ok(source);
        }
        match self.db.storage().table(name)? {
            Some(PersistedTable::Node(table)) => Ok(Box::new(PersistedNodeScan::new(table))),
            Some(PersistedTable::Rel(table)) => Ok(Box::new(PersistedRelScan::new(table))),
            None => Err(Error::CatalogError(format!("Table {name} does not exist."))),
        }
    }

    /// Run a bulk copy into a persisted table.
    ///
    /// A pending cancellation is consumed by the statement it affects.
    pub fn copy(&self, statement: CopyStatement) -> Result<CopySummary> {
        let statement_id = self.begin_statement();
        let result = self.run_copy(statement_id, statement);
        self.cancel.reset();
        result
    }

    fn run_copy(&self, statement_id: u64, statement: CopyStatement) -> Result<CopySummary> {
        let CopyStatement {
            target,
            source,
            options,
        } = statement;
        tracing::debug!(
            "[COPY] connection {} statement {statement_id}: copy into '{target}' from {source:?}",
            self.id
        );
        let table = self.copy_target(&target)?;

        let (mut loader, mut rows): (BulkCopyLoader, BoxedRowIterator) = match source {
            CopySource::Handle(handle) => {
                let (kind, cursor) = open_handle(handle)?;
                (
                    BulkCopyLoader::new(table, kind, &options)?,
                    Box::new(cursor) as BoxedRowIterator,
                )
            }
            CopySource::VirtualTable(name) => {
                let entry = self.db.catalog().lookup(&name)?.ok_or_else(|| {
                    Error::CatalogError(format!("Table {name} does not exist."))
                })?;
                let mut loader = BulkCopyLoader::new(table, SourceKind::Arrow, &options)?;
                if let VirtualTableKind::Rel(rel) = &entry.kind {
                    let schema = rel.source().schema();
                    loader = loader.with_endpoint_columns(
                        schema.field(rel.from_column()).name(),
                        schema.field(rel.to_column()).name(),
                    );
                }
                let cursor = entry.source().open_scan()?;
                (loader, Box::new(cursor) as BoxedRowIterator)
            }
            CopySource::Csv(path) => {
                let loader = BulkCopyLoader::new(table, SourceKind::Csv, &options)?;
                let session = CsvReader::new(loader.options().csv.clone())
                    .open(&path, &loader.source_layout())?;
                (loader, Box::new(session) as BoxedRowIterator)
            }
            CopySource::Query(stream) => (
                BulkCopyLoader::new(table, SourceKind::Subquery, &options)?,
                stream,
            ),
        };

        let mut warnings = self.lock_warnings()?;
        loader.run(
            rows.as_mut(),
            CopyContext {
                statement_id,
                warnings: &mut warnings,
                cancel: &self.cancel,
            },
        )
    }

    fn copy_target(&self, name: &str) -> Result<PersistedTable> {
        if let Some(table) = self.db.storage().table(name)? {
            return Ok(table);
        }
        if self.db.catalog().contains(name)? {
            return Err(Error::CatalogError(format!(
                "Table {name} is a virtual table and cannot be copied into."
            )));
        }
        Err(Error::CatalogError(format!("Table {name} does not exist.")))
    }

    /// Token that cancels this connection's running copy at its next batch
    /// boundary.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Warnings of the most recent statement that produced any, as
    /// `index: UInt64, message: Utf8`.
    pub fn show_warnings(&self) -> Result<RecordBatch> {
        let drained = self.lock_warnings()?.drain();
        let (indices, messages): (Vec<u64>, Vec<String>) = drained.into_iter().unzip();
        let schema = Arc::new(Schema::new(vec![
            Field::new("index", DataType::UInt64, false),
            Field::new("message", DataType::Utf8, false),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                Arc::new(UInt64Array::from(indices)) as ArrayRef,
                Arc::new(StringArray::from(messages)) as ArrayRef,
            ],
        )?)
    }

    pub fn warnings(&self) -> Result<Vec<Warning>> {
        Ok(self.lock_warnings()?.entries().to_vec())
    }

    pub fn clear_warnings(&self) -> Result<()> {
        self.lock_warnings()?.clear();
        Ok(())
    }

    fn lock_warnings(&self) -> Result<MutexGuard<'_, WarningSink>> {
        self.warnings
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire warning sink lock".to_string()))
    }
}
