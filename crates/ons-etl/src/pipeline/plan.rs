//! Load ordering
//!
//! The reference table always goes first, built from the union of every
//! dataset's reference rows, so no fact row can point at a subsystem that is
//! not already in the transaction.

use crate::catalog::ReferenceSpec;
use crate::error::ReconcileError;
use crate::records::{ReconciledRecordSet, Value};
use crate::reconcile::ReconciledDataset;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LoadPlanEntry {
    pub table: String,
    pub records: ReconciledRecordSet,
    pub dedup: bool,
}

#[derive(Debug, Clone)]
pub struct LoadPlan {
    entries: Vec<LoadPlanEntry>,
}

impl LoadPlan {
    /// Reference table first with dedup set, then every fact table in the
    /// order given
    pub fn build(
        reference: &ReferenceSpec,
        datasets: Vec<ReconciledDataset>,
    ) -> Result<Self, ReconcileError> {
        let mut reference_rows = ReconciledRecordSet::new(
            &reference.target_table,
            reference.schema.columns().to_vec(),
        );
        let mut facts = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            reference_rows.append(dataset.reference);
            facts.push(dataset.facts);
        }

        let reference_rows = merge_reference(reference, reference_rows);
        for records in &facts {
            verify_reference_coverage(reference, &reference_rows, records)?;
        }

        let mut entries = Vec::with_capacity(facts.len() + 1);
        entries.push(LoadPlanEntry {
            table: reference.target_table.clone(),
            records: reference_rows,
            dedup: true,
        });
        entries.extend(facts.into_iter().map(|records| LoadPlanEntry {
            table: records.table.clone(),
            records,
            dedup: false,
        }));

        Ok(Self { entries })
    }

    /// A plan taken as is; the caller is responsible for ordering
    pub fn from_entries(entries: Vec<LoadPlanEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[LoadPlanEntry] {
        &self.entries
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.table.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Distinct reference rows, one per key in first-seen order. Rows without a
/// key are dropped; a key seen with different attributes keeps the first.
pub fn merge_reference(
    reference: &ReferenceSpec,
    rows: ReconciledRecordSet,
) -> ReconciledRecordSet {
    let Some(key_idx) = rows.column_index(&reference.key_column) else {
        return rows.distinct();
    };

    let before = rows.len();
    let mut first_seen: HashMap<Value, usize> = HashMap::new();
    let mut merged = ReconciledRecordSet::new(&rows.table, rows.columns.clone());

    for row in rows.rows {
        let key = row.get(key_idx).cloned().unwrap_or(Value::Null);
        if key.is_null() {
            continue;
        }
        match first_seen.get(&key) {
            Some(&at) => {
                if merged.rows[at] != row {
                    warn!(
                        table = %reference.target_table,
                        key = %key,
                        kept = ?merged.rows[at],
                        ignored = ?row,
                        "Conflicting reference rows for the same key"
                    );
                }
            }
            None => {
                first_seen.insert(key, merged.rows.len());
                merged.rows.push(row);
            }
        }
    }

    debug!(
        table = %reference.target_table,
        before,
        after = merged.len(),
        "Merged reference rows"
    );
    merged
}

/// Every non-null key a fact table uses must be present in the reference rows
pub fn verify_reference_coverage(
    reference: &ReferenceSpec,
    reference_rows: &ReconciledRecordSet,
    facts: &ReconciledRecordSet,
) -> Result<(), ReconcileError> {
    let (Some(ref_idx), Some(fact_idx)) = (
        reference_rows.column_index(&reference.key_column),
        facts.column_index(&reference.key_column),
    ) else {
        return Ok(());
    };

    let known: HashSet<&Value> = reference_rows
        .rows
        .iter()
        .filter_map(|row| row.get(ref_idx))
        .collect();

    let missing: Vec<&Value> = facts
        .rows
        .iter()
        .filter_map(|row| row.get(fact_idx))
        .filter(|value| !value.is_null() && !known.contains(value))
        .collect();

    match missing.first() {
        None => Ok(()),
        Some(example) => Err(ReconcileError::DanglingReference {
            table: facts.table.clone(),
            reference: reference.target_table.clone(),
            column: reference.key_column.clone(),
            count: missing.len(),
            example: example.to_string(),
        }),
    }
}
