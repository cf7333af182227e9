//! Error types shared across the workspace

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for common utilities
pub type Result<T> = std::result::Result<T, OnsError>;

#[derive(Error, Debug)]
pub enum OnsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}
