use std::sync::Arc;

use crate::{KeyValue, LogicalType, TableId};

/// Resolves primary-key values of one node table to row offsets.
///
/// Implemented by persisted node tables and by virtual node tables, so that
/// relationship registration, relationship scans and relationship copies can
/// resolve endpoints without knowing where the node rows live.
pub trait NodeKeyLookup: Send + Sync {
    fn table_id(&self) -> TableId;

    fn table_name(&self) -> &str;

    fn primary_key_type(&self) -> LogicalType;

    /// Row offset of the node holding `key`, if any.
    fn lookup_offset(&self, key: &KeyValue) -> Option<u64>;
}

/// Resolves node table names for relationship registration.
pub trait NodeTableResolver {
    fn resolve_node_table(&self, name: &str) -> Option<Arc<dyn NodeKeyLookup>>;
}
