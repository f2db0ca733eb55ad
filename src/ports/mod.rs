use std::path::Path;

use crate::domain::package::Package;
use crate::error::Result;

/// Source of the packages to analyse.
pub trait PackageLoader {
    /// `pattern` is `.` for `root` alone or `./...` for every directory below it.
    fn load(&self, root: &Path, pattern: &str) -> Result<Vec<Package>>;
}

/// Destination of the unified diff.
pub trait PatchSink {
    /// Starts a run; previous contents are discarded.
    fn begin(&self) -> Result<()>;
    fn append(&self, section: &str) -> Result<()>;
}
