//! In-memory persisted node and relationship tables.
//!
//! Tables publish committed rows as immutable snapshots. Writes go through a
//! per-table writer ([`NodeTableWriter`], [`RelTableWriter`]) that holds an
//! exclusive lease, enforces primary-key and endpoint integrity row by row,
//! and commits all staged rows in one swap.

#![forbid(unsafe_code)]

mod lease;
pub mod manager;
pub mod node_table;
pub mod rel_table;

pub use manager::{PersistedTable, StorageManager};
pub use node_table::{NodeTable, NodeTableData, NodeTableSnapshot, NodeTableWriter};
pub use rel_table::{RelPair, RelTable, RelTableData, RelTableWriter};

use llgraph_result::RowIntegrityError;

/// A row rejected by an integrity check during append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// Row index within the appended batch.
    pub row: usize,
    pub error: RowIntegrityError,
}

/// Accepted and rejected row counts of one append call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub accepted: usize,
    pub rejected: usize,
}
