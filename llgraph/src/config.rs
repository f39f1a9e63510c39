use llgraph_copy::DEFAULT_WARNING_LIMIT;
use llgraph_scan::ScanOptions;

/// Database-wide settings.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Upper bound on rows per batch when scanning persisted tables.
    pub scan_batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            scan_batch_size: ScanOptions::default().batch_size,
        }
    }
}

impl DatabaseConfig {
    pub(crate) fn scan_options(&self) -> ScanOptions {
        ScanOptions::default().with_batch_size(self.scan_batch_size)
    }
}

/// Per-connection settings.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Warnings kept for one statement before further ones are dropped.
    pub warning_limit: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            warning_limit: DEFAULT_WARNING_LIMIT,
        }
    }
}
