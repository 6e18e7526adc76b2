mod paths;
use anyhow::Result;
use paths::ReportData;
use std::path::{Path, PathBuf};

/// Get or create a subdirectory under the per-user report directory.
/// - [`subpath`]: If Some(P), a subdirectory will be created if
///   necessary and returned. If None, the root report directory will
///   be returned.
pub fn get_or_create_report_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
    ReportData::get_report_path(subpath)
}
