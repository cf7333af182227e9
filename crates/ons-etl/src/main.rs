//! ONS ETL - one pipeline run per invocation

use anyhow::{Context, Result};
use clap::Parser;
use ons_common::logging::{init_logging, LogConfig};
use ons_etl::config::EtlConfig;
use tracing::info;

/// Scrape the ONS energy datasets and load them into the database.
///
/// Sources are fixed; the database comes from DATABASE_URL.
#[derive(Parser, Debug)]
#[command(name = "ons-etl")]
#[command(author, version, about)]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    let _cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .log_file_prefix("ons-etl")
        .filter_directives("chromiumoxide=warn,sqlx=warn")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let config = EtlConfig::load().context("Invalid configuration")?;
    info!(
        work_dir = %config.work_dir.display(),
        headless = config.browser.headless,
        "Configuration loaded"
    );

    let report = ons_etl::pipeline::run(&config).await;
    report.log_summary();
    report.into_result()?;

    Ok(())
}
