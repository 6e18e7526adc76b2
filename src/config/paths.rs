use std::{
    env::current_exe,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use directories::ProjectDirs;

struct BaseLocations();
impl BaseLocations {
    fn proj_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from(
            "dev",
            "reglas",
            current_exe()
                .ok()?
                .file_name()?
                .to_string_lossy()
                .as_ref(),
        )
    }
}

trait ConfigPath {
    fn get_root_path() -> Result<PathBuf>;

    /// Get a subdir under the root, creating as necessary.
    fn get_or_create_subdir<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
        let root_path = Self::get_root_path()?;
        let full_path = subpath
            .map(|p| root_path.to_owned().join(p))
            .unwrap_or(root_path);
        std::fs::create_dir_all(&full_path)?;
        Ok(full_path.to_owned())
    }
}

/// Per-user data directory holding generated reports and images.
pub(crate) struct ReportData();
impl ConfigPath for ReportData {
    fn get_root_path() -> Result<PathBuf> {
        Ok(BaseLocations::proj_dirs()
            .map(|d| d.data_dir().to_owned())
            .ok_or(anyhow!("Unable to determine report data dir!"))?)
    }
}
impl ReportData {
    /// Get or create a path under the report data directory.
    pub(crate) fn get_report_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
        Self::get_or_create_subdir(subpath)
    }
}
