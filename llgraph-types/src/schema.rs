//! Column descriptors and schema helpers.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use llgraph_result::{Error, Result};

use crate::{LogicalType, TypeCoercionMapper};

/// Internal node id column exposed by node scans.
pub const INTERNAL_ID_COLUMN: &str = "_id";
/// Source endpoint column exposed by relationship scans.
pub const SRC_ID_COLUMN: &str = "_src";
/// Destination endpoint column exposed by relationship scans.
pub const DST_ID_COLUMN: &str = "_dst";

/// Name, internal type and nullability of one table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Arrow field using the storage type of this column.
    pub fn to_field(&self) -> Field {
        Field::new(&self.name, self.logical_type.storage_type(), self.nullable)
    }
}

/// Map every field of a foreign schema to a descriptor.
///
/// Fails on the first column whose type has no internal counterpart.
pub fn describe_schema(schema: &Schema, operation: &str) -> Result<Vec<ColumnDescriptor>> {
    schema
        .fields()
        .iter()
        .map(|field| {
            let logical = TypeCoercionMapper::infer(field.data_type(), field.name(), operation)?;
            Ok(ColumnDescriptor {
                name: field.name().clone(),
                logical_type: logical,
                nullable: field.is_nullable(),
            })
        })
        .collect()
}

/// Storage schema built from descriptors, optionally prefixed by `UInt64`
/// internal id columns.
pub fn storage_schema(prefix: &[&str], columns: &[ColumnDescriptor]) -> SchemaRef {
    let mut fields: Vec<Field> = prefix
        .iter()
        .map(|name| Field::new(*name, DataType::UInt64, false))
        .collect();
    fields.extend(columns.iter().map(ColumnDescriptor::to_field));
    Arc::new(Schema::new(fields))
}

/// Reject empty, duplicated or reserved column names.
pub fn validate_column_names(table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
    let mut seen = rustc_hash::FxHashSet::default();
    for col in columns {
        if col.name.is_empty() {
            return Err(Error::InvalidArgumentError(format!(
                "table '{table}' has a column with an empty name"
            )));
        }
        if [INTERNAL_ID_COLUMN, SRC_ID_COLUMN, DST_ID_COLUMN].contains(&col.name.as_str()) {
            return Err(Error::InvalidArgumentError(format!(
                "column name '{}' is reserved",
                col.name
            )));
        }
        if !seen.insert(col.name.as_str()) {
            return Err(Error::CatalogError(format!(
                "Duplicate column name '{}' in table '{table}'",
                col.name
            )));
        }
    }
    Ok(())
}
