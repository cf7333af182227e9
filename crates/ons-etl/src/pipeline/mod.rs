//! One ETL run: scrape, download, reconcile, load, commit, clean up
//!
//! ```text
//! Scraping -> Downloading -> Reconciling -> Loading -> Committing -> CleaningUp -> Done
//!     \____________\______________\____________\___________\-> CleaningUp -> Failed
//! ```
//!
//! Cleanup runs whatever the outcome and never changes it.

pub mod load;
pub mod orchestrator;
pub mod plan;
pub mod portals;

pub use orchestrator::{run, PipelineOrchestrator};
pub use plan::{LoadPlan, LoadPlanEntry};

use crate::error::EtlError;
use crate::workdir::CleanupStatus;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Scraping,
    Downloading,
    Reconciling,
    Loading,
    Committing,
    CleaningUp,
    Done,
    Failed,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStage::Scraping => "scraping",
            RunStage::Downloading => "downloading",
            RunStage::Reconciling => "reconciling",
            RunStage::Loading => "loading",
            RunStage::Committing => "committing",
            RunStage::CleaningUp => "cleaning up",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Every table committed
    Done,
    /// Rolled back; `stage` is where the error was raised
    Failed { stage: RunStage, error: EtlError },
}

/// Error returned for a failed run
#[derive(Error, Debug)]
#[error("ETL run failed while {stage}")]
pub struct RunFailure {
    pub stage: RunStage,
    #[source]
    pub error: EtlError,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Rows committed per table, in load order; empty unless the run is done
    pub rows_per_table: Vec<(String, u64)>,
    pub files_downloaded: usize,
    pub duration: Duration,
    pub cleanup: CleanupStatus,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Done)
    }

    pub fn failed_stage(&self) -> Option<RunStage> {
        match &self.outcome {
            RunOutcome::Done => None,
            RunOutcome::Failed { stage, .. } => Some(*stage),
        }
    }

    pub fn total_rows(&self) -> u64 {
        self.rows_per_table.iter().map(|(_, rows)| rows).sum()
    }

    pub fn log_summary(&self) {
        match &self.outcome {
            RunOutcome::Done => {
                for (table, rows) in &self.rows_per_table {
                    info!(table = %table, rows, "Committed table");
                }
                info!(
                    files = self.files_downloaded,
                    tables = self.rows_per_table.len(),
                    rows = self.total_rows(),
                    duration_ms = self.duration.as_millis() as u64,
                    cleanup = ?self.cleanup,
                    "Successfully loaded tables from source files"
                );
            }
            RunOutcome::Failed { stage, error } => {
                error!(
                    stage = %stage,
                    error = %error,
                    files = self.files_downloaded,
                    duration_ms = self.duration.as_millis() as u64,
                    cleanup = ?self.cleanup,
                    "ETL run failed; nothing was committed"
                );
            }
        }
    }

    pub fn into_result(self) -> Result<RunReport, RunFailure> {
        match self.outcome {
            RunOutcome::Done => Ok(self),
            RunOutcome::Failed { stage, error } => Err(RunFailure { stage, error }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;

    #[test]
    fn test_failed_report_converts_to_error_with_stage() {
        let report = RunReport {
            outcome: RunOutcome::Failed {
                stage: RunStage::Reconciling,
                error: CatalogError::UnknownDataset {
                    identifier: "relatorio".to_string(),
                }
                .into(),
            },
            rows_per_table: vec![],
            files_downloaded: 2,
            duration: Duration::from_secs(1),
            cleanup: CleanupStatus::Removed,
        };
        assert!(!report.is_success());
        assert_eq!(report.failed_stage(), Some(RunStage::Reconciling));

        let failure = match report.into_result() {
            Err(failure) => failure,
            Ok(_) => panic!("failed run reported success"),
        };
        assert_eq!(failure.to_string(), "ETL run failed while reconciling");
        assert!(failure.error.to_string().contains("relatorio"));
    }

    #[test]
    fn test_done_report_totals_rows() {
        let report = RunReport {
            outcome: RunOutcome::Done,
            rows_per_table: vec![("subsistema".into(), 4), ("custo".into(), 10)],
            files_downloaded: 5,
            duration: Duration::from_millis(10),
            cleanup: CleanupStatus::AlreadyAbsent,
        };
        assert_eq!(report.total_rows(), 14);
        assert!(report.into_result().is_ok());
    }
}
