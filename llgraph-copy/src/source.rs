use llgraph_foreign::{ForeignColumnarSource, ForeignHandle, HandleKind, SourceCursor};
use llgraph_result::Result;

use crate::options::SourceKind;

/// Open a single pass over an ad-hoc host handle.
///
/// Handles of an unsupported shape fail here with the unsupported-type
/// error, before any option is looked at.
pub fn open_handle(handle: ForeignHandle) -> Result<(SourceKind, SourceCursor)> {
    let kind = match handle.kind() {
        HandleKind::DataFrame => SourceKind::DataFrame,
        HandleKind::Arrow | HandleKind::Unsupported => SourceKind::Arrow,
    };
    let source = ForeignColumnarSource::from_handle(handle)?;
    Ok((kind, source.open_scan()?))
}
