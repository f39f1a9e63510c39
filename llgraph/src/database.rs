use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use llgraph_foreign::VirtualTableCatalog;
use llgraph_result::{Error, Result};
use llgraph_storage::StorageManager;
use llgraph_types::TableIdAllocator;

use crate::config::{ConnectionConfig, DatabaseConfig};
use crate::connection::Connection;

/// An in-memory graph database: persisted tables plus the virtual table
/// catalog, sharing one table id space and one namespace.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    config: DatabaseConfig,
    storage: StorageManager,
    catalog: VirtualTableCatalog,
    /// Serialises name checks across storage and catalog with the creation
    /// that follows them.
    ddl: Mutex<()>,
    next_connection: AtomicU64,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(DatabaseConfig::default())
    }
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        let ids = Arc::new(TableIdAllocator::new());
        tracing::debug!("[CATALOG] opening database with {config:?}");
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                storage: StorageManager::new(Arc::clone(&ids)),
                catalog: VirtualTableCatalog::new(ids),
                ddl: Mutex::new(()),
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    pub fn connect(&self) -> Connection {
        self.connect_with(ConnectionConfig::default())
    }

    pub fn connect_with(&self, config: ConnectionConfig) -> Connection {
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        Connection::new(self.clone(), id, config)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &StorageManager {
        &self.inner.storage
    }

    pub fn catalog(&self) -> &VirtualTableCatalog {
        &self.inner.catalog
    }

    pub(crate) fn ddl_lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.inner
            .ddl
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire DDL lock".to_string()))
    }

    /// Fail if `name` is taken by a table of either kind.
    pub(crate) fn ensure_name_free(&self, name: &str) -> Result<()> {
        if self.storage().contains(name)? || self.catalog().contains(name)? {
            return Err(Error::CatalogError(format!("Table {name} already exists.")));
        }
        Ok(())
    }
}
