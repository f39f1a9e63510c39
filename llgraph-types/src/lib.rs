//! Shared types for the llgraph crates.
//!
//! - [`LogicalType`] and [`ColumnDescriptor`] describe table columns.
//! - [`TypeCoercionMapper`] maps foreign Arrow types onto logical types.
//! - [`Value`] and [`KeyValue`] carry host scalars and primary keys.
//! - [`NodeId`], [`TableId`] and [`SourceId`] identify rows, tables and
//!   registered foreign sources.

pub mod coercion;
pub mod ids;
pub mod key;
pub mod logical_type;
pub mod lookup;
pub mod schema;
pub mod value;

pub use coercion::TypeCoercionMapper;
pub use ids::{MAX_NODE_OFFSET, NodeId, SourceId, TableId, TableIdAllocator};
pub use key::{KeyValue, key_at};
pub use logical_type::LogicalType;
pub use lookup::{NodeKeyLookup, NodeTableResolver};
pub use schema::{
    ColumnDescriptor, DST_ID_COLUMN, INTERNAL_ID_COLUMN, SRC_ID_COLUMN, describe_schema,
    storage_schema, validate_column_names,
};
pub use value::{Value, common_type, values_to_array};
