//! Bulk archive copy through the `rsync` binary.

use super::FileSync;
use crate::{MigrateError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

const RSYNC_FLAGS: [&str; 9] = [
    "-azP",
    "--ignore-existing",
    "--exclude=*.log",
    "--exclude=.*",
    "--exclude=*.json",
    "--stats",
    "--progress",
    "--checksum",
    "--",
];

/// Runs `rsync` between two locally mounted archive directories.
#[derive(Debug, Clone)]
pub struct RsyncFileSync {
    program: PathBuf,
}

impl Default for RsyncFileSync {
    fn default() -> Self {
        Self::new()
    }
}

impl RsyncFileSync {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("rsync"),
        }
    }

    /// Use a specific rsync executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(source: &Path, destination: &Path) -> Vec<OsString> {
        // Trailing slash copies the contents of source, not the directory itself.
        let mut source = source.as_os_str().to_os_string();
        if !source.to_string_lossy().ends_with('/') {
            source.push("/");
        }
        let mut args: Vec<OsString> = RSYNC_FLAGS.iter().map(OsString::from).collect();
        args.push(source);
        args.push(destination.as_os_str().to_os_string());
        args
    }
}

#[async_trait]
impl FileSync for RsyncFileSync {
    async fn sync(&self, source: &Path, destination: &Path) -> Result<()> {
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| MigrateError::io_with_path(e, destination))?;

        info!("Syncing {} -> {}", source.display(), destination.display());
        let output = Command::new(&self.program)
            .args(Self::args(source, destination))
            .output()
            .await
            .map_err(|e| MigrateError::FileSync {
                message: format!("failed to run {}: {}", self.program.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MigrateError::FileSync {
                message: format!("rsync exited with {}: {}", output.status, stderr.trim()),
            });
        }

        debug!("rsync finished: {}", String::from_utf8_lossy(&output.stdout).trim());
        Ok(())
    }
}
