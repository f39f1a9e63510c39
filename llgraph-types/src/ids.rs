//! Identifiers shared across llgraph crates.
//!
//! These types live in `llgraph-types` so they can be reused without depending
//! on the storage crate.

// `modular_bitfield` expansions trip `unused_parens` on recent toolchains.
#![allow(unused_parens)]

use std::fmt;
use std::sync::Mutex;

use llgraph_result::{Error, Result};

use modular_bitfield::prelude::*;

/// Unique identifier for a node or relationship table.
///
/// Table IDs are 16-bit unsigned integers. Table ID `0` is never handed out so
/// that a zeroed [`NodeId`] cannot alias a real row.
pub type TableId = u16;

/// Largest row offset a [`NodeId`] can address.
pub const MAX_NODE_OFFSET: u64 = (1u64 << 48) - 1;

/// Internal identifier of a node row.
///
/// # Bit Layout
///
/// ```text
/// |------ 64 bits total ------|
/// |  offset   |   table_id    |
/// |  48 bits  |   16 bits     |
/// ```
///
/// Node scans expose the packed `u64` as the `_id` column, and relationship
/// scans expose the ids of both endpoints as `_src` and `_dst`. Ids for
/// virtual node tables are assigned from the row's position in the foreign
/// source, so they stay stable for as long as the source is registered.
#[bitfield]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u64)]
pub struct NodeId {
    /// Row offset within the table.
    pub offset: B48,
    /// Owning table.
    pub table_id: B16,
}

impl NodeId {
    /// Construct a node id from its parts.
    #[inline]
    pub fn from_parts(table_id: TableId, offset: u64) -> Self {
        debug_assert!(offset <= MAX_NODE_OFFSET);
        NodeId::new().with_table_id(table_id).with_offset(offset)
    }

    /// Packed representation stored in `_id` columns.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.into()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id(), self.offset())
    }
}

/// Hands out table ids shared by persisted and virtual tables.
///
/// Ids given back with [`TableIdAllocator::release`] are reused before the
/// counter advances, so register/unregister churn never exhausts the space.
#[derive(Debug)]
pub struct TableIdAllocator {
    state: Mutex<AllocatorState>,
}

#[derive(Debug)]
struct AllocatorState {
    next: u32,
    free: Vec<TableId>,
}

impl Default for TableIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TableIdAllocator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                next: 1,
                free: Vec::new(),
            }),
        }
    }

    pub fn allocate(&self) -> Result<TableId> {
        let mut state = self.lock()?;
        if let Some(id) = state.free.pop() {
            return Ok(id);
        }
        let id = TableId::try_from(state.next)
            .map_err(|_| Error::Internal("table id space exhausted".to_string()))?;
        state.next += 1;
        Ok(id)
    }

    /// Return `id` for reuse. The caller must no longer use it.
    pub fn release(&self, id: TableId) -> Result<()> {
        let mut state = self.lock()?;
        debug_assert!(id != 0 && u32::from(id) < state.next);
        debug_assert!(!state.free.contains(&id));
        state.free.push(id);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, AllocatorState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire table id allocator lock".to_string()))
    }
}

/// Identifier handed out when a foreign source is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arrow_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_packs_table_in_high_bits() {
        let id = NodeId::from_parts(3, 42);
        assert_eq!(id.as_u64(), (3u64 << 48) | 42);
        assert_eq!(NodeId::from(id.as_u64()), id);
        assert_eq!(id.to_string(), "3:42");
    }

    #[test]
    fn allocator_skips_zero() {
        let alloc = TableIdAllocator::new();
        assert_eq!(alloc.allocate().unwrap(), 1);
        assert_eq!(alloc.allocate().unwrap(), 2);
    }

    #[test]
    fn released_ids_are_reused() {
        let alloc = TableIdAllocator::new();
        let kept = alloc.allocate().unwrap();
        for _ in 0..(u32::from(u16::MAX) + 10) {
            let id = alloc.allocate().unwrap();
            assert_ne!(id, kept);
            alloc.release(id).unwrap();
        }
        assert_eq!(alloc.allocate().unwrap(), 2);
        assert_eq!(alloc.allocate().unwrap(), 3);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let alloc = TableIdAllocator::new();
        for _ in 1..=u16::MAX {
            alloc.allocate().unwrap();
        }
        assert!(matches!(alloc.allocate(), Err(Error::Internal(_))));
    }

    #[test]
    fn source_ids_display_with_prefix() {
        assert_eq!(SourceId(0).to_string(), "arrow_0");
    }
}
