//! Packaging tool discovery and bundle repackaging

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{ResignError, Result};
use crate::process::{ProcessResult, ProcessRunner};

/// Executable name of the packaging tool
pub const PACKAGING_TOOL: &str = "makeappx";

const SDK_ROOTS: &[&str] = &[
    r"C:\Program Files (x86)\Windows Kits\10\bin",
    r"C:\Program Files\Windows Kits\10\bin",
];

const SDK_ARCHITECTURES: &[&str] = &["x64", "x86", "arm64"];

/// Rebuilds a bundle from a directory of member packages
#[async_trait]
pub trait Repackager: Send + Sync {
    /// Write `bundle` from the packages in `members_dir`
    ///
    /// Tool failures come back in the result rather than as an error so the
    /// caller decides what they mean.
    async fn repackage(&self, bundle: &Path, members_dir: &Path) -> ProcessResult;
}

/// Find the packaging tool
///
/// Tries `explicit`, then `PATH`, then the Windows SDK install directories
/// (newest SDK version first).
pub fn locate_packaging_tool(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(ResignError::ToolNotFound {
            tool: path.display().to_string(),
            hint: "Check pipeline.packaging_tool or --packaging-tool".to_string(),
        });
    }

    if let Ok(path) = which::which(PACKAGING_TOOL) {
        debug!(path = %path.display(), "found packaging tool on PATH");
        return Ok(path);
    }

    for root in SDK_ROOTS {
        if let Some(path) = find_in_sdk(Path::new(root)) {
            debug!(path = %path.display(), "found packaging tool in Windows SDK");
            return Ok(path);
        }
    }

    Err(ResignError::ToolNotFound {
        tool: format!("{}.exe", PACKAGING_TOOL),
        hint: "Install the Windows SDK or add makeappx.exe to PATH".to_string(),
    })
}

fn find_in_sdk(sdk_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(sdk_dir).ok()?;
    let mut versions: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    versions.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    versions.iter().find_map(|version| {
        SDK_ARCHITECTURES
            .iter()
            .map(|arch| version.join(arch).join(format!("{}.exe", PACKAGING_TOOL)))
            .find(|tool| tool.is_file())
    })
}

/// Arguments that build `bundle` from `members_dir`, overwriting it
pub fn bundle_args(bundle: &Path, members_dir: &Path) -> Vec<OsString> {
    vec![
        "bundle".into(),
        "/p".into(),
        bundle.as_os_str().to_os_string(),
        "/d".into(),
        members_dir.as_os_str().to_os_string(),
        "/o".into(),
    ]
}

/// [`Repackager`] running `makeappx bundle`
#[derive(Debug, Clone)]
pub struct MakeAppxRepackager {
    tool: PathBuf,
    timeout: Duration,
}

impl MakeAppxRepackager {
    /// Use `tool`, killing it after `timeout`
    pub fn new(tool: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            timeout,
        }
    }

    /// Path of the packaging tool
    pub fn tool(&self) -> &Path {
        &self.tool
    }
}

#[async_trait]
impl Repackager for MakeAppxRepackager {
    #[instrument(skip(self), fields(tool = %self.tool.display()))]
    async fn repackage(&self, bundle: &Path, members_dir: &Path) -> ProcessResult {
        ProcessRunner::new()
            .execute(&self.tool, bundle_args(bundle, members_dir), self.timeout)
            .await
    }
}
