//! Error taxonomy for an ETL run
//!
//! Every variant is fatal for the run that raised it. None of them are retried:
//! an unreachable portal, a drifted page layout, an upstream format change or a
//! migration gap all need a person to look at them. Each error carries the URL,
//! dataset, table or column needed to diagnose it from the log alone.

use crate::catalog::ColumnType;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type EtlResult<T> = std::result::Result<T, EtlError>;

/// Top-level error of a pipeline run
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Portal(#[from] PortalError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatchError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid or missing process configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("DATABASE_URL not set")]
    MissingDatabaseUrl,

    #[error("DATABASE_URL must include a protocol, e.g. postgresql://host/db")]
    InvalidDatabaseUrl,

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Failures while driving the source portals
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Couldn't access page {url}: {reason}")]
    PageUnreachable { url: String, reason: String },

    #[error("No element matching {locator} on {url}")]
    ElementNotFound { url: String, locator: String },

    #[error("{count} elements match {locator} on {url}, expected exactly one; refusing to guess")]
    AmbiguousElement {
        url: String,
        locator: String,
        count: usize,
    },

    #[error("Download from {url} did not complete within {timeout_secs}s")]
    DownloadTimeout { url: String, timeout_secs: u64 },

    #[error("Download from {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Failed to save download to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Browser session error: {message}")]
    Session { message: String },
}

impl PortalError {
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }
}

/// Lookup of a dataset identifier that has no registered mapping
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unknown dataset '{identifier}': no catalog entry matches this file name")]
    UnknownDataset { identifier: String },
}

/// A downloaded file does not parse against its expected column schema
#[derive(Error, Debug)]
pub enum SchemaMismatchError {
    #[error("{file}: expected column '{column}' is missing from the header")]
    MissingColumn { file: PathBuf, column: String },

    #[error("{file}:{line}: column '{column}' value '{value}' is not a valid {expected}")]
    InvalidValue {
        file: PathBuf,
        line: u64,
        column: String,
        value: String,
        expected: ColumnType,
    },

    #[error("{file}: malformed delimited data: {source}")]
    Malformed {
        file: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Renamed source columns cannot populate the canonical schema
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Dataset '{dataset}': canonical column '{column}' for table {table} has no source")]
    MissingColumn {
        dataset: String,
        table: String,
        column: String,
    },

    #[error("Dataset '{dataset}': source columns {sources:?} all rename to '{column}'")]
    DuplicateColumn {
        dataset: String,
        column: String,
        sources: Vec<String>,
    },

    #[error("Dataset '{dataset}': column '{column}' is {found} but table {table} expects {expected}")]
    TypeMismatch {
        dataset: String,
        table: String,
        column: String,
        expected: ColumnType,
        found: ColumnType,
    },

    #[error("Table {table}: {count} rows reference {column} values missing from {reference} (e.g. '{example}')")]
    DanglingReference {
        table: String,
        reference: String,
        column: String,
        count: usize,
        example: String,
    },
}

/// Failures while writing a record set inside the run transaction
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Missing table {table} in the database; migrations are out of sync")]
    MissingTable { table: String },

    #[error("Table {table}: column '{column}' is not produced by the reconciled data")]
    MissingColumn { table: String, column: String },

    #[error("Table {table}: column '{column}' holds a {found} value where {expected} was expected")]
    ValueType {
        table: String,
        column: String,
        expected: ColumnType,
        found: &'static str,
    },

    #[error("Failed to insert into {table}: {source}")]
    Insert {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to reflect database metadata: {0}")]
    Reflect(#[source] sqlx::Error),

    #[error("Transaction {action} failed: {source}")]
    Transaction {
        action: &'static str,
        #[source]
        source: sqlx::Error,
    },
}
