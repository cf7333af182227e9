//! Per-run private working directory

use crate::error::{EtlError, EtlResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of removing the working directory at the end of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStatus {
    Removed,
    AlreadyAbsent,
    /// Removal failed; logged as a warning and never escalated
    Failed(String),
    /// The directory was never created
    Skipped,
}

#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Create the directory. An existing empty directory is reused; one with
    /// contents is refused and left untouched.
    pub fn create(path: impl Into<PathBuf>) -> EtlResult<Self> {
        let path = path.into();
        let io_err = |source| EtlError::WorkDir {
            path: path.clone(),
            source,
        };

        if path.exists() {
            let mut entries = std::fs::read_dir(&path).map_err(io_err)?;
            if entries.next().is_some() {
                warn!(path = %path.display(), "Refusing non-empty working directory");
                return Err(io_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "directory exists and is not empty",
                )));
            }
        }
        std::fs::create_dir_all(&path).map_err(io_err)?;
        debug!(path = %path.display(), "Created working directory");

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cleanup(&self) -> CleanupStatus {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Removed working directory");
                CleanupStatus::Removed
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Working directory already absent");
                CleanupStatus::AlreadyAbsent
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Unexpected error removing working directory"
                );
                CleanupStatus::Failed(e.to_string())
            }
        }
    }
}
