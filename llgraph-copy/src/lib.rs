//! Bulk copy into persisted graph tables.
//!
//! A copy statement validates its options against the source kind, maps and
//! type-checks the source columns, then streams batches into a table writer.
//! Row integrity failures go through one [`ErrorPolicy`] decision each: abort
//! the statement (the default) or skip the row and record a warning in the
//! connection's [`WarningSink`].

pub mod cancel;
pub mod csv;
pub mod loader;
pub mod options;
pub mod policy;
pub mod source;
pub mod warnings;

pub use cancel::CancellationToken;
pub use csv::{CsvReadOptions, CsvReadSession, CsvReader};
pub use loader::{BulkCopyLoader, CopyContext, CopyState, CopySummary, copy_into};
pub use options::{CopyOptions, OptionValidator, OptionValue, SourceKind, ValidatedOptions};
pub use policy::{ErrorPolicy, RowFailureAction};
pub use source::open_handle;
pub use warnings::{DEFAULT_WARNING_LIMIT, Warning, WarningSink};
