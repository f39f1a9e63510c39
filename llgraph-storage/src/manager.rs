//! Name-based registry of persisted tables.

use std::sync::{Arc, RwLock};

use llgraph_result::{Error, Result};
use llgraph_types::{
    ColumnDescriptor, NodeKeyLookup, NodeTableResolver, TableIdAllocator, validate_column_names,
};
use rustc_hash::FxHashMap;

use crate::node_table::NodeTable;
use crate::rel_table::{RelPair, RelTable};

/// A persisted table of either kind.
#[derive(Debug, Clone)]
pub enum PersistedTable {
    Node(Arc<NodeTable>),
    Rel(Arc<RelTable>),
}

/// Owns every persisted node and relationship table of a database.
///
/// Table names are case-sensitive and shared by both kinds.
#[derive(Debug, Clone)]
pub struct StorageManager {
    inner: Arc<RwLock<StorageInner>>,
    ids: Arc<TableIdAllocator>,
}

#[derive(Debug, Default)]
struct StorageInner {
    tables: FxHashMap<String, PersistedTable>,
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new(Arc::new(TableIdAllocator::new()))
    }
}

impl StorageManager {
    pub fn new(ids: Arc<TableIdAllocator>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StorageInner::default())),
            ids,
        }
    }

    /// Create an empty node table keyed by `primary_key`.
    ///
    /// The primary-key column becomes non-nullable.
    pub fn create_node_table(
        &self,
        name: &str,
        mut columns: Vec<ColumnDescriptor>,
        primary_key: &str,
    ) -> Result<Arc<NodeTable>> {
        validate_column_names(name, &columns)?;
        let pk = columns
            .iter()
            .position(|c| c.name == primary_key)
            .ok_or_else(|| {
                Error::InvalidArgumentError(format!(
                    "primary key column '{primary_key}' is not a column of table '{name}'"
                ))
            })?;
        if !columns[pk].logical_type.is_key_type() {
            return Err(Error::InvalidArgumentError(format!(
                "column '{primary_key}' of type {} cannot be a primary key",
                columns[pk].logical_type
            )));
        }
        columns[pk].nullable = false;

        let mut inner = self.write_inner()?;
        if inner.tables.contains_key(name) {
            return Err(Error::CatalogError(format!(
                "Table '{name}' already exists in catalog"
            )));
        }
        let table = Arc::new(NodeTable::new(
            self.ids.allocate()?,
            name.to_string(),
            columns,
            pk,
        ));
        inner
            .tables
            .insert(name.to_string(), PersistedTable::Node(Arc::clone(&table)));
        tracing::debug!(
            "[STORAGE] created node table '{}' with id {}",
            name,
            table.table_id()
        );
        Ok(table)
    }

    /// Create an empty relationship table over one or more node table pairs.
    pub fn create_rel_table(
        &self,
        name: &str,
        pairs: &[(&str, &str)],
        properties: Vec<ColumnDescriptor>,
    ) -> Result<Arc<RelTable>> {
        if pairs.is_empty() {
            return Err(Error::InvalidArgumentError(format!(
                "relationship table '{name}' needs at least one FROM/TO pair"
            )));
        }
        validate_column_names(name, &properties)?;

        let mut inner = self.write_inner()?;
        if inner.tables.contains_key(name) {
            return Err(Error::CatalogError(format!(
                "Table '{name}' already exists in catalog"
            )));
        }
        let mut resolved = Vec::with_capacity(pairs.len());
        for (from, to) in pairs {
            resolved.push(RelPair {
                from: inner.node(from)?,
                to: inner.node(to)?,
            });
        }
        let table = Arc::new(RelTable::new(
            self.ids.allocate()?,
            name.to_string(),
            resolved,
            properties,
        ));
        inner
            .tables
            .insert(name.to_string(), PersistedTable::Rel(Arc::clone(&table)));
        tracing::debug!(
            "[STORAGE] created relationship table '{}' with id {}",
            name,
            table.table_id()
        );
        Ok(table)
    }

    pub fn table(&self, name: &str) -> Result<Option<PersistedTable>> {
        Ok(self.read_inner()?.tables.get(name).cloned())
    }

    pub fn node_table(&self, name: &str) -> Result<Option<Arc<NodeTable>>> {
        Ok(match self.table(name)? {
            Some(PersistedTable::Node(table)) => Some(table),
            _ => None,
        })
    }

    pub fn rel_table(&self, name: &str) -> Result<Option<Arc<RelTable>>> {
        Ok(match self.table(name)? {
            Some(PersistedTable::Rel(table)) => Some(table),
            _ => None,
        })
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.read_inner()?.tables.contains_key(name))
    }

    /// Sorted names of every persisted table.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read_inner()?.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, StorageInner>> {
        self.inner
            .read()
            .map_err(|_| Error::Internal("Failed to acquire storage read lock".to_string()))
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, StorageInner>> {
        self.inner
            .write()
            .map_err(|_| Error::Internal("Failed to acquire storage write lock".to_string()))
    }
}

impl StorageInner {
    fn node(&self, name: &str) -> Result<Arc<NodeTable>> {
        match self.tables.get(name) {
            Some(PersistedTable::Node(table)) => Ok(Arc::clone(table)),
            _ => Err(Error::CatalogResolution(format!(
                "Table {name} does not exist."
            ))),
        }
    }
}

impl NodeTableResolver for StorageManager {
    fn resolve_node_table(&self, name: &str) -> Option<Arc<dyn NodeKeyLookup>> {
        self.node_table(name)
            .ok()
            .flatten()
            .map(|table| table as Arc<dyn NodeKeyLookup>)
    }
}
