//! Mapping between foreign Arrow types and internal [`LogicalType`]s.
//!
//! Two entry points exist:
//!
//! - [`TypeCoercionMapper::infer`] decides the internal type of a foreign column
//!   when it is scanned in place (virtual tables, ad-hoc copy sources).
//! - [`TypeCoercionMapper::coerce_for_copy`] checks a foreign column against the
//!   declared type of an existing persisted column. Only identity and the
//!   lossless widenings in [`TypeCoercionMapper::is_lossless_widening`] are
//!   accepted; everything else fails the whole copy before a row is written.
//!
//! Values are never converted lossily. Nulls stay nulls whatever the declared
//! type, since Arrow carries validity separately from values.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use llgraph_result::{Error, Result};

use crate::LogicalType;

/// Stateless mapper between the foreign and internal type systems.
pub struct TypeCoercionMapper;

impl TypeCoercionMapper {
    /// Infer the internal type of a foreign column.
    ///
    /// `column` and `operation` are only used to word the error.
    pub fn infer(data_type: &DataType, column: &str, operation: &str) -> Result<LogicalType> {
        let logical = match data_type {
            DataType::Boolean => LogicalType::Bool,
            DataType::Int8 => LogicalType::Int8,
            DataType::Int16 => LogicalType::Int16,
            DataType::Int32 => LogicalType::Int32,
            DataType::Int64 => LogicalType::Int64,
            DataType::UInt8 => LogicalType::UInt8,
            DataType::UInt16 => LogicalType::UInt16,
            DataType::UInt32 => LogicalType::UInt32,
            DataType::UInt64 => LogicalType::UInt64,
            DataType::Float16 | DataType::Float32 => LogicalType::Float,
            DataType::Float64 => LogicalType::Double,
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => LogicalType::String,
            DataType::Dictionary(_, values)
                if matches!(values.as_ref(), DataType::Utf8 | DataType::LargeUtf8) =>
            {
                LogicalType::String
            }
            DataType::Binary | DataType::LargeBinary | DataType::BinaryView => LogicalType::Blob,
            DataType::Date32 | DataType::Date64 => LogicalType::Date,
            DataType::Timestamp(_, None) => LogicalType::Timestamp,
            // An all-null column carries no type of its own.
            DataType::Null => LogicalType::String,
            other => return Err(Error::unsupported_column_type(column, other, operation)),
        };
        Ok(logical)
    }

    /// Validate that a foreign column can be copied into a column declared as
    /// `target`, returning the internal type the source infers to.
    pub fn coerce_for_copy(
        source: &DataType,
        target: LogicalType,
        column: &str,
    ) -> Result<LogicalType> {
        if matches!(source, DataType::Null) {
            return Ok(target);
        }
        let inferred = Self::infer(source, column, "copy")?;
        if inferred == target || Self::is_lossless_widening(inferred, target) {
            return Ok(inferred);
        }
        Err(Error::TypeMismatch(format!(
            "Column '{column}' of type {inferred} cannot be copied into a column of type {target}."
        )))
    }

    /// The complete widening table used by copies. Identity is handled by the
    /// caller.
    pub fn is_lossless_widening(from: LogicalType, to: LogicalType) -> bool {
        use LogicalType::*;
        match from {
            Int8 => matches!(to, Int16 | Int32 | Int64 | Float | Double),
            Int16 => matches!(to, Int32 | Int64 | Float | Double),
            Int32 => matches!(to, Int64 | Double),
            UInt8 => matches!(
                to,
                UInt16 | UInt32 | UInt64 | Int16 | Int32 | Int64 | Float | Double
            ),
            UInt16 => matches!(to, UInt32 | UInt64 | Int32 | Int64 | Float | Double),
            UInt32 => matches!(to, UInt64 | Int64 | Double),
            Float => matches!(to, Double),
            Date => matches!(to, Timestamp),
            Bool | Int64 | UInt64 | Double | String | Blob | Timestamp => false,
        }
    }

    /// Cast a column into the storage type of `target`.
    ///
    /// Columns already stored in the right Arrow type are returned as-is (no
    /// copy). Callers must have validated the pairing first.
    pub fn to_storage(array: &ArrayRef, target: LogicalType) -> Result<ArrayRef> {
        let storage = target.storage_type();
        if array.data_type() == &storage {
            return Ok(Arc::clone(array));
        }
        let casted = cast(array.as_ref(), &storage)?;
        if casted.logical_null_count() != array.logical_null_count() {
            return Err(Error::Internal(format!(
                "casting {:?} to {target} introduced nulls",
                array.data_type()
            )));
        }
        Ok(casted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Date32Array, Int32Array, StringArray, StringDictionaryBuilder};
    use arrow::datatypes::{Field, Int32Type, TimeUnit};

    #[test]
    fn widening_accepts_int32_into_int64() {
        let ty = TypeCoercionMapper::coerce_for_copy(&DataType::Int32, LogicalType::Int64, "id")
            .expect("int32 widens to int64");
        assert_eq!(ty, LogicalType::Int32);
    }

    #[test]
    fn narrowing_is_rejected() {
        let err = TypeCoercionMapper::coerce_for_copy(&DataType::Int64, LogicalType::Int32, "id")
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(ref msg) if msg.contains("INT64") && msg.contains("INT32")));

        let err =
            TypeCoercionMapper::coerce_for_copy(&DataType::Float64, LogicalType::Float, "score")
                .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn int64_does_not_widen_into_double() {
        assert!(!TypeCoercionMapper::is_lossless_widening(
            LogicalType::Int64,
            LogicalType::Double
        ));
        assert!(TypeCoercionMapper::is_lossless_widening(
            LogicalType::Int32,
            LogicalType::Double
        ));
    }

    #[test]
    fn bool_only_copies_into_bool() {
        assert!(
            TypeCoercionMapper::coerce_for_copy(&DataType::Boolean, LogicalType::Bool, "b").is_ok()
        );
        assert!(
            TypeCoercionMapper::coerce_for_copy(&DataType::Boolean, LogicalType::Int8, "b")
                .is_err()
        );
    }

    #[test]
    fn null_column_copies_into_anything() {
        let ty = TypeCoercionMapper::coerce_for_copy(&DataType::Null, LogicalType::Date, "d")
            .expect("null column");
        assert_eq!(ty, LogicalType::Date);
    }

    #[test]
    fn nested_types_are_unsupported() {
        let list = DataType::List(Arc::new(Field::new("item", DataType::Int64, true)));
        let err = TypeCoercionMapper::infer(&list, "tags", "scan").unwrap_err();
        match err {
            Error::UnsupportedSourceType(msg) => {
                assert!(msg.contains("'tags'"));
                assert!(msg.contains("scan"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn timestamps_with_time_zone_are_unsupported() {
        let ty = DataType::Timestamp(TimeUnit::Second, Some("UTC".into()));
        assert!(TypeCoercionMapper::infer(&ty, "ts", "scan").is_err());
        let ty = DataType::Timestamp(TimeUnit::Nanosecond, None);
        assert_eq!(
            TypeCoercionMapper::infer(&ty, "ts", "scan").unwrap(),
            LogicalType::Timestamp
        );
    }

    #[test]
    fn to_storage_preserves_nulls_and_skips_identity_casts() {
        let ints: ArrayRef = Arc::new(Int32Array::from(vec![Some(1), None, Some(3)]));
        let widened = TypeCoercionMapper::to_storage(&ints, LogicalType::Int64).unwrap();
        assert_eq!(widened.data_type(), &DataType::Int64);
        assert_eq!(widened.null_count(), 1);

        let same = TypeCoercionMapper::to_storage(&ints, LogicalType::Int32).unwrap();
        assert!(Arc::ptr_eq(&same, &ints));

        let days: ArrayRef = Arc::new(Date32Array::from(vec![1, 2]));
        let ts = TypeCoercionMapper::to_storage(&days, LogicalType::Timestamp).unwrap();
        assert_eq!(ts.data_type(), &LogicalType::Timestamp.storage_type());
    }

    #[test]
    fn dictionary_strings_are_unpacked() {
        let mut builder = StringDictionaryBuilder::<Int32Type>::new();
        builder.append_value("eng");
        builder.append_null();
        builder.append_value("eng");
        let dict: ArrayRef = Arc::new(builder.finish());
        assert_eq!(
            TypeCoercionMapper::infer(dict.data_type(), "dept", "scan").unwrap(),
            LogicalType::String
        );
        let plain = TypeCoercionMapper::to_storage(&dict, LogicalType::String).unwrap();
        let plain = plain.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(plain.value(2), "eng");
        assert!(plain.is_null(1));
    }
}
