//! Registry of virtual tables backed by foreign sources.
//!
//! Names are case-sensitive and unique within the catalog. Entries are shared
//! as `Arc`s under a single `RwLock`, so a lookup racing an unregistration
//! sees either the complete entry or nothing.
//!
//! Virtual node tables use their first column as primary key. The key index
//! is built once at registration over keys in their storage type; when a key
//! repeats, the first row wins.
//! Virtual relationship tables resolve their endpoint node tables when they
//! are registered, looking at virtual node tables first and persisted ones
//! second.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use llgraph_result::{Error, Result};
use llgraph_types::{
    KeyValue, LogicalType, NodeKeyLookup, NodeTableResolver, SourceId, TableId, TableIdAllocator,
    TypeCoercionMapper, key_at,
};
use rustc_hash::FxHashMap;

use crate::handle::ForeignHandle;
use crate::source::{CloseOutcome, ForeignColumnarSource};

/// A virtual node table.
#[derive(Debug)]
pub struct VirtualNodeTable {
    table_id: TableId,
    name: String,
    source: ForeignColumnarSource,
    pk_index: FxHashMap<KeyValue, u64>,
}

impl VirtualNodeTable {
    fn new(table_id: TableId, name: String, source: ForeignColumnarSource) -> Result<Self> {
        if source.descriptors().is_empty() {
            return Err(Error::InvalidArgumentError(format!(
                "virtual node table '{name}' needs at least one column"
            )));
        }
        let mut pk_index = FxHashMap::default();
        let pk_type = source.descriptors()[0].logical_type;
        if pk_type.is_key_type() {
            let mut offset = 0u64;
            for batch in source.retained_batches()?.iter() {
                let keys = TypeCoercionMapper::to_storage(batch.column(0), pk_type)?;
                for row in 0..batch.num_rows() {
                    if let Some(key) = key_at(&keys, row)? {
                        pk_index.entry(key).or_insert(offset);
                    }
                    offset += 1;
                }
            }
        }
        Ok(Self {
            table_id,
            name,
            source,
            pk_index,
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn source(&self) -> &ForeignColumnarSource {
        &self.source
    }
}

impl NodeKeyLookup for VirtualNodeTable {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn table_name(&self) -> &str {
        &self.name
    }

    fn primary_key_type(&self) -> LogicalType {
        self.source.descriptors()[0].logical_type
    }

    fn lookup_offset(&self, key: &KeyValue) -> Option<u64> {
        self.pk_index.get(key).copied()
    }
}

/// A virtual relationship table.
pub struct VirtualRelTable {
    source: ForeignColumnarSource,
    from: Arc<dyn NodeKeyLookup>,
    to: Arc<dyn NodeKeyLookup>,
    from_column: usize,
    to_column: usize,
}

impl std::fmt::Debug for VirtualRelTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualRelTable")
            .field("from", &self.from.table_name())
            .field("to", &self.to.table_name())
            .field("from_column", &self.from_column)
            .field("to_column", &self.to_column)
            .finish()
    }
}

impl VirtualRelTable {
    pub fn source(&self) -> &ForeignColumnarSource {
        &self.source
    }

    pub fn from_table(&self) -> &Arc<dyn NodeKeyLookup> {
        &self.from
    }

    pub fn to_table(&self) -> &Arc<dyn NodeKeyLookup> {
        &self.to
    }

    pub fn from_column(&self) -> usize {
        self.from_column
    }

    pub fn to_column(&self) -> usize {
        self.to_column
    }

    /// Source columns other than the two endpoint columns, in order.
    pub fn property_columns(&self) -> Vec<usize> {
        (0..self.source.descriptors().len())
            .filter(|idx| *idx != self.from_column && *idx != self.to_column)
            .collect()
    }
}

#[derive(Debug)]
pub enum VirtualTableKind {
    Node(Arc<VirtualNodeTable>),
    Rel(VirtualRelTable),
}

#[derive(Debug)]
pub struct VirtualTableEntry {
    pub name: String,
    pub source_id: SourceId,
    pub kind: VirtualTableKind,
}

impl VirtualTableEntry {
    pub fn source(&self) -> &ForeignColumnarSource {
        match &self.kind {
            VirtualTableKind::Node(node) => &node.source,
            VirtualTableKind::Rel(rel) => &rel.source,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self.kind, VirtualTableKind::Node(_))
    }
}

/// Endpoint settings of a virtual relationship registration.
#[derive(Debug, Clone, Default)]
pub struct RelEndpoints {
    pub from_table: String,
    pub to_table: String,
    /// Endpoint column names; `from`/`to` or the first two columns if unset.
    pub from_column: Option<String>,
    pub to_column: Option<String>,
}

impl RelEndpoints {
    pub fn new(from_table: impl Into<String>, to_table: impl Into<String>) -> Self {
        Self {
            from_table: from_table.into(),
            to_table: to_table.into(),
            from_column: None,
            to_column: None,
        }
    }

    pub fn with_columns(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_column = Some(from.into());
        self.to_column = Some(to.into());
        self
    }
}

/// Name -> virtual table registry of one database.
#[derive(Debug, Clone)]
pub struct VirtualTableCatalog {
    inner: Arc<RwLock<CatalogInner>>,
    ids: Arc<TableIdAllocator>,
    next_source: Arc<AtomicU64>,
}

#[derive(Debug, Default)]
struct CatalogInner {
    entries: FxHashMap<String, Arc<VirtualTableEntry>>,
}

impl Default for VirtualTableCatalog {
    fn default() -> Self {
        Self::new(Arc::new(TableIdAllocator::new()))
    }
}

impl VirtualTableCatalog {
    pub fn new(ids: Arc<TableIdAllocator>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CatalogInner::default())),
            ids,
            next_source: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register `handle` as a virtual node table.
    pub fn register_node(&self, name: &str, handle: ForeignHandle) -> Result<SourceId> {
        self.ensure_absent(name)?;
        let source_id = self.next_source_id();
        let source = ForeignColumnarSource::retain(handle, source_id)?;
        let table_id = self.ids.allocate()?;
        let node = match VirtualNodeTable::new(table_id, name.to_string(), source) {
            Ok(node) => node,
            Err(err) => {
                self.ids.release(table_id)?;
                return Err(err);
            }
        };
        let mut inner = self.write_inner()?;
        if let Err(err) = ensure_vacant(&inner, name) {
            drop(inner);
            self.ids.release(table_id)?;
            return Err(err);
        }
        insert_entry(
            &mut inner,
            VirtualTableEntry {
                name: name.to_string(),
                source_id,
                kind: VirtualTableKind::Node(Arc::new(node)),
            },
        );
        Ok(source_id)
    }

    /// Register `handle` as a virtual relationship table.
    ///
    /// Endpoint tables are resolved in this catalog first, then through
    /// `persisted`. Resolution and insertion happen under one write lock, so
    /// a referenced virtual node table cannot be unregistered in between.
    pub fn register_rel(
        &self,
        name: &str,
        handle: ForeignHandle,
        endpoints: &RelEndpoints,
        persisted: &dyn NodeTableResolver,
    ) -> Result<SourceId> {
        self.ensure_absent(name)?;
        let source_id = self.next_source_id();
        let source = ForeignColumnarSource::retain(handle, source_id)?;
        let (from_column, to_column) = endpoint_columns(&source, endpoints)?;

        let mut inner = self.write_inner()?;
        ensure_vacant(&inner, name)?;
        let from = resolve_endpoint_table(&inner, &endpoints.from_table, persisted)?;
        let to = resolve_endpoint_table(&inner, &endpoints.to_table, persisted)?;
        check_endpoint_type(&source, from_column, from.as_ref())?;
        check_endpoint_type(&source, to_column, to.as_ref())?;

        insert_entry(
            &mut inner,
            VirtualTableEntry {
                name: name.to_string(),
                source_id,
                kind: VirtualTableKind::Rel(VirtualRelTable {
                    source,
                    from,
                    to,
                    from_column,
                    to_column,
                }),
            },
        );
        Ok(source_id)
    }

    pub fn lookup(&self, name: &str) -> Result<Option<Arc<VirtualTableEntry>>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::Internal("Failed to acquire catalog read lock".to_string()))?;
        Ok(inner.entries.get(name).cloned())
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.lookup(name)?.is_some())
    }

    /// Remove `name` and release the catalog's hold on its host memory.
    ///
    /// Fails while a registered virtual relationship still references a
    /// virtual node table of that name.
    pub fn unregister(&self, name: &str) -> Result<CloseOutcome> {
        let entry = {
            let mut inner = self.write_inner()?;
            let Some(entry) = inner.entries.get(name) else {
                return Err(Error::CatalogError(format!(
                    "Table {name} does not exist."
                )));
            };
            if let VirtualTableKind::Node(node) = &entry.kind {
                let node_id = node.table_id;
                let referencing = inner.entries.values().find(|other| match &other.kind {
                    VirtualTableKind::Rel(rel) => {
                        rel.from.table_id() == node_id || rel.to.table_id() == node_id
                    }
                    VirtualTableKind::Node(_) => false,
                });
                if let Some(rel) = referencing {
                    return Err(Error::CatalogError(format!(
                        "Cannot delete node table {name} because it is referenced by relationship table {}.",
                        rel.name
                    )));
                }
            }
            inner
                .entries
                .remove(name)
                .ok_or_else(|| Error::Internal("catalog entry vanished".to_string()))?
        };
        if let VirtualTableKind::Node(node) = &entry.kind {
            self.ids.release(node.table_id)?;
        }
        let outcome = entry.source().close()?;
        tracing::debug!("[CATALOG] unregistered virtual table '{}': {:?}", name, outcome);
        Ok(outcome)
    }

    /// Sorted names of every virtual table.
    pub fn names(&self) -> Result<Vec<String>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::Internal("Failed to acquire catalog read lock".to_string()))?;
        let mut names: Vec<String> = inner.entries.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn next_source_id(&self) -> SourceId {
        SourceId(self.next_source.fetch_add(1, Ordering::Relaxed))
    }

    fn ensure_absent(&self, name: &str) -> Result<()> {
        if self.contains(name)? {
            return Err(Error::CatalogError(format!(
                "Table {name} already exists."
            )));
        }
        Ok(())
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, CatalogInner>> {
        self.inner
            .write()
            .map_err(|_| Error::Internal("Failed to acquire catalog write lock".to_string()))
    }
}

fn ensure_vacant(inner: &CatalogInner, name: &str) -> Result<()> {
    if inner.entries.contains_key(name) {
        return Err(Error::CatalogError(format!(
            "Table {name} already exists."
        )));
    }
    Ok(())
}

fn insert_entry(inner: &mut CatalogInner, entry: VirtualTableEntry) {
    tracing::debug!(
        "[CATALOG] registered virtual {} table '{}' as {}",
        if entry.is_node() { "node" } else { "relationship" },
        entry.name,
        entry.source_id
    );
    inner.entries.insert(entry.name.clone(), Arc::new(entry));
}

fn resolve_endpoint_table(
    inner: &CatalogInner,
    name: &str,
    persisted: &dyn NodeTableResolver,
) -> Result<Arc<dyn NodeKeyLookup>> {
    match inner.entries.get(name).map(|entry| &entry.kind) {
        Some(VirtualTableKind::Node(node)) => {
            return Ok(Arc::clone(node) as Arc<dyn NodeKeyLookup>);
        }
        Some(VirtualTableKind::Rel(_)) => {
            return Err(Error::CatalogResolution(format!(
                "Table {name} is not a node table."
            )));
        }
        None => {}
    }
    persisted
        .resolve_node_table(name)
        .ok_or_else(|| Error::CatalogResolution(format!("Table {name} does not exist.")))
}

impl NodeTableResolver for VirtualTableCatalog {
    fn resolve_node_table(&self, name: &str) -> Option<Arc<dyn NodeKeyLookup>> {
        match &self.lookup(name).ok()??.kind {
            VirtualTableKind::Node(node) => Some(Arc::clone(node) as Arc<dyn NodeKeyLookup>),
            VirtualTableKind::Rel(_) => None,
        }
    }
}

fn endpoint_columns(
    source: &ForeignColumnarSource,
    endpoints: &RelEndpoints,
) -> Result<(usize, usize)> {
    let find = |name: &str| {
        source.column_index(name).ok_or_else(|| {
            Error::InvalidArgumentError(format!("endpoint column '{name}' not found in source"))
        })
    };
    match (&endpoints.from_column, &endpoints.to_column) {
        (Some(from), Some(to)) => Ok((find(from)?, find(to)?)),
        (None, None) => match (source.column_index("from"), source.column_index("to")) {
            (Some(from), Some(to)) => Ok((from, to)),
            _ if source.descriptors().len() >= 2 => Ok((0, 1)),
            _ => Err(Error::InvalidArgumentError(
                "relationship source needs at least two columns".into(),
            )),
        },
        _ => Err(Error::InvalidArgumentError(
            "both endpoint columns must be named together".into(),
        )),
    }
}

fn check_endpoint_type(
    source: &ForeignColumnarSource,
    column: usize,
    table: &dyn NodeKeyLookup,
) -> Result<()> {
    let pk_type = table.primary_key_type();
    if !pk_type.is_key_type() {
        return Err(Error::TypeMismatch(format!(
            "Node table {} has primary key type {pk_type}, which cannot be referenced.",
            table.table_name()
        )));
    }
    let field = source.schema().field(column).clone();
    TypeCoercionMapper::coerce_for_copy(field.data_type(), pk_type, field.name())?;
    Ok(())
}
