//! Error types and result definitions for the llgraph foreign-data subsystem.
//!
//! This crate provides the single error type ([`Error`]) and result alias
//! ([`Result<T>`]) used by every other llgraph crate.
//!
//! # Error Categories
//!
//! - **Catalog errors** ([`Error::CatalogError`], [`Error::CatalogResolution`]): duplicate
//!   or unknown virtual table names, unresolved relationship endpoint tables
//! - **Source shape errors** ([`Error::UnsupportedSourceType`]): host values that are not
//!   scannable, foreign columns without an internal type
//! - **Option errors** ([`Error::InvalidOption`]): unrecognized copy options
//! - **Type errors** ([`Error::TypeMismatch`]): source/target column types that do not coerce
//! - **Row integrity errors** ([`Error::RowIntegrity`]): duplicate or null primary keys,
//!   unresolved relationship endpoints
//! - **Data format errors** ([`Error::Arrow`]): Arrow kernels and batch construction
//! - **Internal errors** ([`Error::Internal`]): bugs or unexpected states

pub mod error;
pub mod result;

pub use error::{Error, RowIntegrityError};
pub use result::Result;
