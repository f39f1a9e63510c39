use std::{fmt, io};
use thiserror::Error;

/// Unified error type for all llgraph operations.
///
/// Every crate in the workspace returns this enum so that failures raised while
/// registering foreign data, scanning virtual tables or bulk-copying into
/// persisted tables propagate with `?` without conversion layers.
///
/// # Error Handling Strategy
///
/// Validation-phase errors ([`Error::InvalidOption`], [`Error::UnsupportedSourceType`],
/// [`Error::TypeMismatch`], catalog errors) are raised before any row is touched.
/// Write-phase errors ([`Error::RowIntegrity`]) are either surfaced, aborting the
/// statement, or downgraded to a warning by the copy error policy.
///
/// # Thread Safety
///
/// `Error` implements `Send` and `Sync`.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while reading a file-backed copy source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error during columnar data operations.
    ///
    /// This error occurs when:
    /// - Casting foreign columns into their internal storage type
    /// - Building or slicing record batches
    /// - Importing Arrow C stream handles
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid user input or API parameter.
    ///
    /// The message string provides specific details about what was invalid and why.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Entity not found (row, column or batch).
    #[error("Storage key not found")]
    NotFound,

    /// Catalog name error.
    ///
    /// Raised for duplicate registrations, unknown names on lookup/unregister and
    /// attempts to drop a table that is still referenced.
    #[error("Catalog exception: {0}")]
    CatalogError(String),

    /// A relationship endpoint table could not be resolved.
    ///
    /// Raised by relationship registration and relationship copies when a
    /// `FROM`/`TO` table does not name an existing node table.
    #[error("Catalog exception: {0}")]
    CatalogResolution(String),

    /// A foreign value or column that cannot be scanned.
    ///
    /// Callers match on this variant (and its exact message) to distinguish a
    /// wrongly shaped argument from a bad value inside a correctly shaped one.
    #[error("Binder exception: {0}")]
    UnsupportedSourceType(String),

    /// An unrecognized option name or an option carrying the wrong value type.
    #[error("Binder exception: {0}")]
    InvalidOption(String),

    /// Source column type incompatible with the target column type.
    #[error("Binder exception: {0}")]
    TypeMismatch(String),

    /// A row violated an integrity rule of the target table.
    ///
    /// # Recovery
    ///
    /// Under `IGNORE_ERRORS=true` the copy loader downgrades this error to a
    /// warning and skips the row.
    #[error("Copy exception: {0}")]
    RowIntegrity(#[from] RowIntegrityError),

    /// Data constraint violation outside of the row-level copy path.
    #[error("Constraint Error: {0}")]
    ConstraintError(String),

    /// Concurrency conflict (e.g. a second writer on a table under copy).
    #[error("{0}")]
    TransactionContextError(String),

    /// The owning operation was cancelled.
    #[error("Interrupted: {0}")]
    Cancelled(String),

    /// Internal error indicating a bug or unexpected state.
    ///
    /// If you encounter this error, it likely indicates a bug that should be
    /// reported with reproduction steps.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

/// Row-level integrity failures raised while writing into persisted tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowIntegrityError {
    #[error(
        "Found duplicated primary key value {key}, which violates the uniqueness constraint of the primary key column."
    )]
    DuplicatePrimaryKey { key: String },

    #[error("Found NULL, which violates the non-null constraint of the primary key column.")]
    NullPrimaryKey,

    #[error("Unable to find primary key value {key}.")]
    UnresolvedEndpoint { key: String },

    #[error("Found NULL, which violates the non-null constraint of the {endpoint} column.")]
    NullEndpoint { endpoint: String },
}

impl Error {
    /// Create the error raised when a host value of the wrong shape is passed
    /// where a scannable source is expected.
    ///
    /// # Examples
    ///
    /// ```
    /// use llgraph_result::Error;
    ///
    /// let err = Error::unsupported_source_type("INT64[]", "arrow tables");
    /// assert_eq!(
    ///     err.to_string(),
    ///     "Binder exception: Trying to scan from unsupported data type INT64[]. \
    ///      The only parameter types that can be scanned from are arrow tables."
    /// );
    /// ```
    #[inline]
    pub fn unsupported_source_type(type_name: impl fmt::Display, allow_list: &str) -> Self {
        Error::UnsupportedSourceType(format!(
            "Trying to scan from unsupported data type {type_name}. The only parameter types that can be scanned from are {allow_list}."
        ))
    }

    /// Create the error raised for a column whose foreign type has no internal
    /// counterpart.
    #[inline]
    pub fn unsupported_column_type(
        column: &str,
        data_type: impl fmt::Debug,
        operation: &str,
    ) -> Self {
        Error::UnsupportedSourceType(format!(
            "Column '{column}' has unsupported data type {data_type:?} for {operation}."
        ))
    }

    /// Create the error raised for an option name the scanner does not know.
    #[inline]
    pub fn unrecognized_option(name: &str, source_kind: impl fmt::Display) -> Self {
        Error::InvalidOption(format!(
            "{name} Option not recognized by {source_kind} scanner."
        ))
    }

    /// Create a catalog error from any displayable message.
    #[inline]
    pub fn catalog<E: fmt::Display>(msg: E) -> Self {
        Error::CatalogError(msg.to_string())
    }

    /// Returns the row-level failure carried by this error, if any.
    pub fn as_row_integrity(&self) -> Option<&RowIntegrityError> {
        match self {
            Error::RowIntegrity(inner) => Some(inner),
            _ => None,
        }
    }
}
