//! Internal column types.
//!
//! Every persisted or virtual column carries a [`LogicalType`]. Each logical
//! type has exactly one Arrow storage type; foreign columns are cast into that
//! storage type before they are written.

use std::fmt;

use arrow::datatypes::{DataType, TimeUnit};

/// Internal type of a graph table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
    Blob,
    /// Days since the Unix epoch.
    Date,
    /// Microseconds since the Unix epoch, no time zone.
    Timestamp,
}

impl LogicalType {
    /// Arrow type used to store columns of this logical type.
    pub fn storage_type(&self) -> DataType {
        match self {
            LogicalType::Bool => DataType::Boolean,
            LogicalType::Int8 => DataType::Int8,
            LogicalType::Int16 => DataType::Int16,
            LogicalType::Int32 => DataType::Int32,
            LogicalType::Int64 => DataType::Int64,
            LogicalType::UInt8 => DataType::UInt8,
            LogicalType::UInt16 => DataType::UInt16,
            LogicalType::UInt32 => DataType::UInt32,
            LogicalType::UInt64 => DataType::UInt64,
            LogicalType::Float => DataType::Float32,
            LogicalType::Double => DataType::Float64,
            LogicalType::String => DataType::Utf8,
            LogicalType::Blob => DataType::Binary,
            LogicalType::Date => DataType::Date32,
            LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }

    pub fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            LogicalType::Int8 | LogicalType::Int16 | LogicalType::Int32 | LogicalType::Int64
        )
    }

    pub fn is_unsigned_integer(&self) -> bool {
        matches!(
            self,
            LogicalType::UInt8 | LogicalType::UInt16 | LogicalType::UInt32 | LogicalType::UInt64
        )
    }

    pub fn is_integer(&self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    /// Whether values of this type can serve as a primary key.
    pub fn is_key_type(&self) -> bool {
        self.is_integer()
            || matches!(
                self,
                LogicalType::String | LogicalType::Blob | LogicalType::Date | LogicalType::Timestamp
            )
    }

    pub fn name(&self) -> &'static str {
        match self {
            LogicalType::Bool => "BOOL",
            LogicalType::Int8 => "INT8",
            LogicalType::Int16 => "INT16",
            LogicalType::Int32 => "INT32",
            LogicalType::Int64 => "INT64",
            LogicalType::UInt8 => "UINT8",
            LogicalType::UInt16 => "UINT16",
            LogicalType::UInt32 => "UINT32",
            LogicalType::UInt64 => "UINT64",
            LogicalType::Float => "FLOAT",
            LogicalType::Double => "DOUBLE",
            LogicalType::String => "STRING",
            LogicalType::Blob => "BLOB",
            LogicalType::Date => "DATE",
            LogicalType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
