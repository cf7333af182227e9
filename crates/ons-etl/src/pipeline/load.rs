//! The run transaction
//!
//! One transaction spans the whole plan. Any failure rolls back everything
//! loaded so far; committing is a separate step so the orchestrator can track
//! it as its own stage.

use super::plan::LoadPlan;
use crate::error::LoadError;
use crate::loader::{SchemaMetadata, TableLoader};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info, instrument, warn};

/// A fully loaded plan waiting for commit
pub struct PendingCommit {
    tx: Transaction<'static, Postgres>,
    rows_per_table: Vec<(String, u64)>,
}

impl PendingCommit {
    pub fn rows_per_table(&self) -> &[(String, u64)] {
        &self.rows_per_table
    }

    pub async fn commit(self) -> Result<Vec<(String, u64)>, LoadError> {
        self.tx
            .commit()
            .await
            .map_err(|source| LoadError::Transaction {
                action: "commit",
                source,
            })?;
        info!(tables = self.rows_per_table.len(), "Transaction committed");
        Ok(self.rows_per_table)
    }

    pub async fn rollback(self) {
        rollback(self.tx).await;
    }
}

/// Load every entry of `plan`, in order, inside one transaction
#[instrument(skip_all, fields(tables = plan.len()))]
pub async fn load_plan(pool: &PgPool, plan: &LoadPlan) -> Result<PendingCommit, LoadError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|source| LoadError::Transaction {
            action: "begin",
            source,
        })?;

    let metadata = match SchemaMetadata::reflect(&mut tx).await {
        Ok(metadata) => metadata,
        Err(e) => {
            rollback(tx).await;
            return Err(e);
        }
    };
    let loader = TableLoader::new(metadata);

    let mut rows_per_table = Vec::with_capacity(plan.len());
    for entry in plan.entries() {
        match loader
            .load(&entry.table, &entry.records, entry.dedup, &mut tx)
            .await
        {
            Ok(rows) => rows_per_table.push((entry.table.clone(), rows)),
            Err(e) => {
                error!(table = %entry.table, error = %e, "Error saving data on table; rolling back");
                rollback(tx).await;
                return Err(e);
            }
        }
    }

    Ok(PendingCommit { tx, rows_per_table })
}

async fn rollback(tx: Transaction<'static, Postgres>) {
    match tx.rollback().await {
        Ok(()) => info!("Transaction rolled back"),
        // The connection drops the transaction on its own if this fails
        Err(e) => warn!(error = %e, "Rollback failed"),
    }
}
