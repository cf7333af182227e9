//! Sequencing of one run

use super::load::load_plan;
use super::plan::LoadPlan;
use super::portals;
use super::{RunOutcome, RunReport, RunStage};
use crate::browser::{BrowserDriver, BrowserNavigator, ChromiumDriver, NavigatorOptions};
use crate::catalog::{DatasetCatalog, DatasetSpec};
use crate::config::EtlConfig;
use crate::db;
use crate::error::{ConfigError, EtlError, EtlResult};
use crate::reconcile::ColumnReconciler;
use crate::workdir::{CleanupStatus, WorkDir};
use sqlx::PgPool;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Mutable bookkeeping of a run in progress
#[derive(Debug)]
struct RunProgress {
    stage: RunStage,
    files_downloaded: usize,
}

impl RunProgress {
    fn new() -> Self {
        Self {
            stage: RunStage::Scraping,
            files_downloaded: 0,
        }
    }

    fn enter(&mut self, stage: RunStage) {
        info!(from = %self.stage, to = %stage, "Run stage");
        self.stage = stage;
    }
}

pub struct PipelineOrchestrator<D> {
    navigator: BrowserNavigator<D>,
    catalog: DatasetCatalog,
    reconciler: ColumnReconciler,
    pool: PgPool,
    work_dir: WorkDir,
}

impl<D: BrowserDriver> PipelineOrchestrator<D> {
    pub fn new(
        navigator: BrowserNavigator<D>,
        catalog: DatasetCatalog,
        reconciler: ColumnReconciler,
        pool: PgPool,
        work_dir: WorkDir,
    ) -> Self {
        Self {
            navigator,
            catalog,
            reconciler,
            pool,
            work_dir,
        }
    }

    /// Run the pipeline to a terminal state. The browser is closed and the
    /// working directory removed whatever happens.
    #[instrument(skip_all, fields(work_dir = %self.work_dir.path().display()))]
    pub async fn run(self) -> RunReport {
        let started = Instant::now();
        let mut progress = RunProgress::new();
        info!("Starting ETL run");

        let result = self.execute(&mut progress).await;

        if let Err(e) = self.navigator.close().await {
            warn!(error = %e, "Failed to close browser session");
        }

        let failed_at = progress.stage;
        progress.enter(RunStage::CleaningUp);
        let cleanup = self.work_dir.cleanup();

        let (outcome, rows_per_table) = match result {
            Ok(rows) => {
                progress.enter(RunStage::Done);
                (RunOutcome::Done, rows)
            }
            Err(error) => {
                progress.enter(RunStage::Failed);
                (
                    RunOutcome::Failed {
                        stage: failed_at,
                        error,
                    },
                    Vec::new(),
                )
            }
        };

        RunReport {
            outcome,
            rows_per_table,
            files_downloaded: progress.files_downloaded,
            duration: started.elapsed(),
            cleanup,
        }
    }

    async fn execute(&self, progress: &mut RunProgress) -> EtlResult<Vec<(String, u64)>> {
        let index = portals::discover(&self.navigator).await?;

        progress.enter(RunStage::Downloading);
        let files = portals::download_all(&self.navigator, &index).await?;
        progress.files_downloaded = files.len();

        progress.enter(RunStage::Reconciling);
        let plan = self.build_plan(&files.paths())?;

        progress.enter(RunStage::Loading);
        let pending = load_plan(&self.pool, &plan).await?;

        progress.enter(RunStage::Committing);
        Ok(pending.commit().await?)
    }

    /// Resolve each file's dataset, reconcile every dataset and order the
    /// result for loading
    pub fn build_plan(&self, files: &[PathBuf]) -> EtlResult<LoadPlan> {
        let mut groups: Vec<(&DatasetSpec, Vec<PathBuf>)> = Vec::new();
        for path in files {
            let spec = self.catalog.resolve_file(path)?;
            match groups
                .iter_mut()
                .find(|(known, _)| known.identifier == spec.identifier)
            {
                Some((_, paths)) => paths.push(path.clone()),
                None => groups.push((spec, vec![path.clone()])),
            }
        }

        let reference = self.catalog.reference();
        let datasets = groups
            .into_iter()
            .map(|(spec, paths)| {
                self.reconciler
                    .reconcile_dataset(spec, reference, &paths)
            })
            .collect::<EtlResult<Vec<_>>>()?;

        let plan = LoadPlan::build(reference, datasets)?;
        info!(tables = ?plan.tables().collect::<Vec<_>>(), "Built load plan");
        Ok(plan)
    }
}

/// Run the pipeline against the live portals with a real browser
pub async fn run(config: &EtlConfig) -> RunReport {
    let started = Instant::now();

    let work_dir = match WorkDir::create(&config.work_dir) {
        Ok(dir) => dir,
        Err(e) => return aborted(started, e, CleanupStatus::Skipped),
    };

    let pool = match db::connect_lazy(&config.database) {
        Ok(pool) => pool,
        Err(e) => {
            let error = ConfigError::Invalid(format!("DATABASE_URL is not usable: {}", e));
            let cleanup = work_dir.cleanup();
            return aborted(started, error.into(), cleanup);
        }
    };

    let browser_dir = work_dir.path().join(".browser");
    let driver = match ChromiumDriver::launch(
        &config.browser,
        &browser_dir.join("profile"),
        &browser_dir.join("downloads"),
    )
    .await
    {
        Ok(driver) => driver,
        Err(e) => {
            let cleanup = work_dir.cleanup();
            return aborted(started, e.into(), cleanup);
        }
    };

    let navigator = BrowserNavigator::new(
        driver,
        work_dir.path(),
        NavigatorOptions {
            navigation_timeout: config.navigation_timeout(),
            download_timeout: config.download_timeout(),
            element_wait: config.element_wait(),
            ..NavigatorOptions::default()
        },
    );

    PipelineOrchestrator::new(
        navigator,
        DatasetCatalog::ons(),
        ColumnReconciler::ons(),
        pool,
        work_dir,
    )
    .run()
    .await
}

fn aborted(started: Instant, error: EtlError, cleanup: CleanupStatus) -> RunReport {
    error!(error = %error, "Run aborted before scraping");
    RunReport {
        outcome: RunOutcome::Failed {
            stage: RunStage::Scraping,
            error,
        },
        rows_per_table: Vec::new(),
        files_downloaded: 0,
        duration: started.elapsed(),
        cleanup,
    }
}
