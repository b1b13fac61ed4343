//! The contract every format capability satisfies.
//!
//! A [`CapabilityProbe`] decides whether a file is in its format and, if so, constructs a
//! [`FormatCapability`] bound to that file for the rest of the harvest attempt.

use std::fmt;
use std::path::Path;

use crate::error::{HarvestResult, ProbeError};
use crate::metadata::FileMetadata;
use crate::types::{ColumnInfo, RawRow};

/// Lazy, finite, single-pass sequence of rows.
pub type RowIter<'a> = Box<dyn Iterator<Item = HarvestResult<RawRow>> + Send + 'a>;

/// A format-specific reader bound to one file.
pub trait FormatCapability: Send {
    /// Parser name reported alongside the file metadata.
    fn name(&self) -> &str;

    /// Per-column information; fixed once the capability is constructed.
    fn column_info(&self) -> &ColumnInfo;

    /// File-level and per-column metadata.
    fn metadata(&self) -> HarvestResult<FileMetadata>;

    /// Stream the rows of the file, restricted to `columns`.
    ///
    /// May be called more than once; every call starts from the first data row.
    fn rows(&self, columns: &[String]) -> HarvestResult<RowIter<'_>>;
}

impl fmt::Debug for dyn FormatCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatCapability")
            .field("name", &self.name())
            .finish()
    }
}

/// Constructs a [`FormatCapability`] for files in one format.
pub trait CapabilityProbe: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Try to bind to `path`.
    ///
    /// [`ProbeError::NotApplicable`] means the file is in some other format.
    fn probe(&self, path: &Path) -> Result<Box<dyn FormatCapability>, ProbeError>;
}

/// A source of externally supplied probes, consulted once when the registry is built.
pub trait CapabilityProvider {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// The probes this provider contributes, in priority order.
    fn probes(&self) -> HarvestResult<Vec<std::sync::Arc<dyn CapabilityProbe>>>;
}
