//! Hashable primary-key values.

use std::fmt;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Date32Array, Date64Array,
    LargeBinaryArray, LargeStringArray, StringArray, StringViewArray,
};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Int8Type, Int16Type, Int32Type, Int64Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType, UInt8Type,
    UInt16Type, UInt32Type, UInt64Type,
};
use llgraph_result::{Error, Result};

/// A primary-key value lifted out of an Arrow column.
///
/// Integer keys of every width normalise to [`KeyValue::Int`] when they fit in
/// an `i64`, so an `INT32` source key and an `INT64` stored key compare equal.
/// Dates and timestamps are keyed by their integer representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    Bytes(Vec<u8>),
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(v.into())
    }
}

impl From<u64> for KeyValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => KeyValue::Int(i),
            Err(_) => KeyValue::UInt(v),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Str(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Str(v)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Bool(b) => write!(f, "{b}"),
            KeyValue::Int(i) => write!(f, "{i}"),
            KeyValue::UInt(u) => write!(f, "{u}"),
            KeyValue::Str(s) => f.write_str(s),
            KeyValue::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Extract the key stored at `row`, `None` when the slot is null.
pub fn key_at(array: &ArrayRef, row: usize) -> Result<Option<KeyValue>> {
    if row >= array.len() {
        return Err(Error::InvalidArgumentError(format!(
            "row {row} out of bounds for key column of length {}",
            array.len()
        )));
    }
    if array.is_null(row) {
        return Ok(None);
    }
    let key = match array.data_type() {
        DataType::Boolean => {
            let arr = downcast::<BooleanArray>(array)?;
            KeyValue::Bool(arr.value(row))
        }
        DataType::Int8 => KeyValue::Int(array.as_primitive::<Int8Type>().value(row).into()),
        DataType::Int16 => KeyValue::Int(array.as_primitive::<Int16Type>().value(row).into()),
        DataType::Int32 => KeyValue::Int(array.as_primitive::<Int32Type>().value(row).into()),
        DataType::Int64 => KeyValue::Int(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => KeyValue::Int(array.as_primitive::<UInt8Type>().value(row).into()),
        DataType::UInt16 => KeyValue::Int(array.as_primitive::<UInt16Type>().value(row).into()),
        DataType::UInt32 => KeyValue::Int(array.as_primitive::<UInt32Type>().value(row).into()),
        DataType::UInt64 => KeyValue::from(array.as_primitive::<UInt64Type>().value(row)),
        DataType::Utf8 => KeyValue::Str(downcast::<StringArray>(array)?.value(row).to_string()),
        DataType::LargeUtf8 => {
            KeyValue::Str(downcast::<LargeStringArray>(array)?.value(row).to_string())
        }
        DataType::Utf8View => {
            KeyValue::Str(downcast::<StringViewArray>(array)?.value(row).to_string())
        }
        DataType::Binary => KeyValue::Bytes(downcast::<BinaryArray>(array)?.value(row).to_vec()),
        DataType::LargeBinary => {
            KeyValue::Bytes(downcast::<LargeBinaryArray>(array)?.value(row).to_vec())
        }
        DataType::Date32 => KeyValue::Int(downcast::<Date32Array>(array)?.value(row).into()),
        // Date64 keys are normalised to days so they meet Date32 storage.
        DataType::Date64 => {
            KeyValue::Int(downcast::<Date64Array>(array)?.value(row) / 86_400_000)
        }
        DataType::Timestamp(unit, None) => {
            let micros = match unit {
                TimeUnit::Second => array
                    .as_primitive::<TimestampSecondType>()
                    .value(row)
                    .saturating_mul(1_000_000),
                TimeUnit::Millisecond => array
                    .as_primitive::<TimestampMillisecondType>()
                    .value(row)
                    .saturating_mul(1_000),
                TimeUnit::Microsecond => array.as_primitive::<TimestampMicrosecondType>().value(row),
                TimeUnit::Nanosecond => {
                    array.as_primitive::<TimestampNanosecondType>().value(row) / 1_000
                }
            };
            KeyValue::Int(micros)
        }
        DataType::Dictionary(_, _) => {
            let plain = cast(array.slice(row, 1).as_ref(), &DataType::Utf8)?;
            return key_at(&plain, 0);
        }
        other => {
            return Err(Error::InvalidArgumentError(format!(
                "data type {other:?} cannot be used as a key"
            )));
        }
    };
    Ok(Some(key))
}

fn downcast<T: 'static>(array: &ArrayRef) -> Result<&T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Internal(format!("unexpected key array {:?}", array.data_type())))
}
