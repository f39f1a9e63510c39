//! Foreign columnar data: host handles, retained sources and the virtual
//! table catalog.

pub mod catalog;
pub mod data_frame;
pub mod handle;
pub mod source;

pub use catalog::{
    RelEndpoints, VirtualNodeTable, VirtualRelTable, VirtualTableCatalog, VirtualTableEntry,
    VirtualTableKind,
};
pub use data_frame::DataFrame;
pub use handle::{
    BoxedBatchReader, ForeignHandle, HandleData, HandleKind, ReleaseGuard, ReleaseHook,
    SCANNABLE_SHAPES,
};
pub use source::{CloseOutcome, ForeignColumnarSource, LifetimeToken, SourceCursor};
