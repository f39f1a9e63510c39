//! Host scalar values.
//!
//! [`Value`] is what a host application hands over outside of Arrow: the cells
//! of a data frame, predicate literals, or an arbitrary non-tabular argument
//! that turns out not to be scannable. Conversion helpers build Arrow arrays
//! once the target type is known.

use std::fmt;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder, new_null_array,
};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use llgraph_result::{Error, Result};

use crate::LogicalType;

/// A host value that has not been placed into an Arrow column yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

macro_rules! impl_from_for_value {
    ($variant:ident, $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_value!(Int, i8, i16, i32, i64, u8, u16, u32);
impl_from_for_value!(Float, f32, f64);
impl_from_for_value!(Str, String);
impl_from_for_value!(Bool, bool);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Internal type this value infers to, `None` for nulls and lists.
    pub fn logical_type(&self) -> Option<LogicalType> {
        match self {
            Value::Null | Value::List(_) => None,
            Value::Bool(_) => Some(LogicalType::Bool),
            Value::Int(_) => Some(LogicalType::Int64),
            Value::Float(_) => Some(LogicalType::Double),
            Value::Str(_) => Some(LogicalType::String),
        }
    }

    /// Type name used in user-facing messages, e.g. `INT64` or `INT64[]`.
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "ANY".to_string(),
            Value::List(items) => {
                let element = common_type(items.iter())
                    .map(|ty| ty.name().to_string())
                    .unwrap_or_else(|| "ANY".to_string());
                format!("{element}[]")
            }
            other => other
                .logical_type()
                .map(|ty| ty.name().to_string())
                .unwrap_or_else(|| "ANY".to_string()),
        }
    }

    /// Build a single-row array holding this value, typed as `data_type`.
    pub fn to_scalar_array(&self, data_type: &DataType) -> Result<ArrayRef> {
        let natural = values_to_array(std::slice::from_ref(self))?;
        if natural.data_type() == data_type {
            return Ok(natural);
        }
        Ok(cast(natural.as_ref(), data_type)?)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Common internal type of a run of values, ignoring nulls.
///
/// Integers mixed with floats resolve to `DOUBLE`; any other mix has no
/// common type.
pub fn common_type<'a>(values: impl Iterator<Item = &'a Value>) -> Option<LogicalType> {
    let mut current: Option<LogicalType> = None;
    for value in values {
        let Some(ty) = value.logical_type() else {
            continue;
        };
        current = match current {
            None => Some(ty),
            Some(prev) if prev == ty => Some(prev),
            Some(LogicalType::Int64) if ty == LogicalType::Double => Some(LogicalType::Double),
            Some(LogicalType::Double) if ty == LogicalType::Int64 => Some(LogicalType::Double),
            Some(_) => return None,
        };
    }
    current
}

/// Build an Arrow array from a column of host values.
///
/// All-null columns become Arrow `Null` arrays. Mixed types that have no
/// common type are rejected.
pub fn values_to_array(values: &[Value]) -> Result<ArrayRef> {
    if values.iter().any(|v| matches!(v, Value::List(_))) {
        return Err(Error::InvalidArgumentError(
            "nested list values cannot be placed into a column".into(),
        ));
    }
    let has_non_null = values.iter().any(|v| !v.is_null());
    let ty = common_type(values.iter());
    let array: ArrayRef = match ty {
        None if !has_non_null => new_null_array(&DataType::Null, values.len()),
        None => {
            return Err(Error::InvalidArgumentError(
                "column mixes values without a common type".into(),
            ));
        }
        Some(LogicalType::Bool) => {
            let mut builder = BooleanBuilder::with_capacity(values.len());
            for v in values {
                match v {
                    Value::Bool(b) => builder.append_value(*b),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        Some(LogicalType::Int64) => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    Value::Int(i) => builder.append_value(*i),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        Some(LogicalType::Double) => {
            let mut builder = Float64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    Value::Int(i) => builder.append_value(*i as f64),
                    Value::Float(x) => builder.append_value(*x),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        Some(LogicalType::String) => {
            let mut builder = StringBuilder::new();
            for v in values {
                match v {
                    Value::Str(s) => builder.append_value(s),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        Some(other) => {
            return Err(Error::Internal(format!(
                "host values never infer to {other}"
            )));
        }
    };
    Ok(array)
}
