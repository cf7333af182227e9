//! ONS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the ONS ETL workspace.
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment variables
//! - **Checksums**: SHA-256 digests for downloaded source files
//! - **Errors**: the common error type returned by these utilities
//!
//! # Example
//!
//! ```no_run
//! use ons_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{OnsError, Result};
