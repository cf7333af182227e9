//! ONS energy-grid ETL
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Downloads the energy balance and operation cost datasets published for the
//! Brazilian grid, reconciles their column layouts into the canonical tables
//! and loads them into PostgreSQL in a single transaction.
//!
//! - [`catalog`]: which file feeds which table
//! - [`reader`] and [`reconcile`]: typed parsing and canonical projection
//! - [`browser`]: portal navigation and downloads
//! - [`loader`]: bulk inserts against reflected metadata
//! - [`pipeline`]: the run state machine

pub mod browser;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod reader;
pub mod reconcile;
pub mod records;
pub mod workdir;

pub use error::{EtlError, EtlResult};
