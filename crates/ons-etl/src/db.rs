//! Database pool setup

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Build the connection pool without connecting. The first connection is
/// made when the load phase opens its transaction, so a run that fails while
/// scraping never touches the database.
pub fn connect_lazy(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_lazy(&config.url)?;

    info!(
        max_connections = config.max_connections,
        "Database pool configured"
    );
    Ok(pool)
}
