//! Column reconciliation
//!
//! Turns typed source tables into record sets laid out exactly like a target
//! table: source names go through a many-to-one rename table, unmapped columns
//! are dropped, and a combined instant column is split into date and time
//! when the target needs both and the source provides neither.

use crate::catalog::{ColumnDef, ColumnType, DatasetSpec, ReferenceSpec, Schema};
use crate::error::{EtlResult, ReconcileError};
use crate::reader::TabularReader;
use crate::records::{ReconciledRecordSet, TypedTable, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Fixed source name -> canonical name mapping. Names not listed map to
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct RenameTable {
    entries: HashMap<String, String>,
}

impl RenameTable {
    pub fn new<I, A, B>(entries: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
        }
    }

    pub fn canonical<'a>(&'a self, source: &'a str) -> &'a str {
        self.entries.get(source).map(String::as_str).unwrap_or(source)
    }

    /// Raw measurement feeds and verified (DESSEM) feeds share target columns
    pub fn ons() -> Self {
        Self::new([
            ("din_instante", "instante"),
            ("nom_subsistema", "nome_subsistema"),
            ("subsistema", "nome_subsistema"),
            // raw measurements
            ("val_gerhidraulica", "geracao_hidraulica"),
            ("val_gertermica", "geracao_termica"),
            ("val_gereolica", "geracao_eolica"),
            ("val_gersolar", "geracao_solar"),
            ("val_carga", "valor_carga"),
            ("val_intercambio", "valor_intercambio"),
            // verified measurements
            ("usina_hidraulica_verificada", "geracao_hidraulica"),
            (
                "geracao_pequena_usina_hidraulica_verificada",
                "geracao_hidraulica_pequena_usina",
            ),
            ("geracao_usina_termica_verificada", "geracao_termica"),
            (
                "geracao_pequena_usina_termica_verificada",
                "geracao_termica_pequena_usina",
            ),
            ("geracao_eolica_verificada", "geracao_eolica"),
            ("geracao_fotovoltaica_verificada", "geracao_solar"),
        ])
    }
}

/// Names involved in splitting a combined instant into date and time
#[derive(Debug, Clone)]
pub struct InstantSplit {
    pub instant: String,
    pub date: String,
    pub time: String,
}

impl Default for InstantSplit {
    fn default() -> Self {
        Self {
            instant: "instante".to_string(),
            date: "data".to_string(),
            time: "hora".to_string(),
        }
    }
}

/// Where each output column takes its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Column(usize),
    DateOf(usize),
    TimeOf(usize),
}

impl Projection {
    fn apply(self, row: &[Value]) -> Value {
        match self {
            Projection::Column(idx) => row.get(idx).cloned().unwrap_or(Value::Null),
            Projection::DateOf(idx) => match row.get(idx) {
                Some(Value::DateTime(dt)) => Value::Date(dt.date()),
                _ => Value::Null,
            },
            Projection::TimeOf(idx) => match row.get(idx) {
                Some(Value::DateTime(dt)) => Value::Time(dt.time()),
                _ => Value::Null,
            },
        }
    }
}

/// Fact rows for a dataset plus its contribution to the reference table
#[derive(Debug, Clone)]
pub struct ReconciledDataset {
    pub facts: ReconciledRecordSet,
    pub reference: ReconciledRecordSet,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnReconciler {
    renames: RenameTable,
    split: InstantSplit,
    reader: TabularReader,
}

impl ColumnReconciler {
    pub fn new(renames: RenameTable, split: InstantSplit) -> Self {
        Self {
            renames,
            split,
            reader: TabularReader::new(),
        }
    }

    pub fn ons() -> Self {
        Self::new(RenameTable::ons(), InstantSplit::default())
    }

    /// Read and reconcile every file of one dataset, concatenated in the
    /// order given. Each file is also projected onto the reference table so
    /// every dataset contributes its own subsystem rows.
    pub fn reconcile_dataset(
        &self,
        spec: &DatasetSpec,
        reference: &ReferenceSpec,
        files: &[PathBuf],
    ) -> EtlResult<ReconciledDataset> {
        let mut facts = empty_set(&spec.target_table, &spec.canonical_schema);
        let mut refs = empty_set(&reference.target_table, &reference.schema);

        for file in files {
            let table = self
                .reader
                .read(file, &spec.source_schema, spec.delimiter)?;
            facts.append(self.project(
                &spec.identifier,
                &spec.target_table,
                &spec.canonical_schema,
                &table,
            )?);
            refs.append(self.project(
                &spec.identifier,
                &reference.target_table,
                &reference.schema,
                &table,
            )?);
        }

        info!(
            dataset = %spec.identifier,
            table = %spec.target_table,
            files = files.len(),
            rows = facts.len(),
            reference_rows = refs.len(),
            "Reconciled dataset"
        );
        Ok(ReconciledDataset {
            facts,
            reference: refs,
        })
    }

    /// Project one typed table onto `target`
    pub fn project(
        &self,
        dataset: &str,
        table_name: &str,
        target: &Schema,
        table: &TypedTable,
    ) -> Result<ReconciledRecordSet, ReconcileError> {
        let plan = self.plan(dataset, table_name, target, &table.columns)?;

        let rows = table
            .rows
            .iter()
            .map(|row| plan.iter().map(|p| p.apply(row)).collect())
            .collect();

        Ok(ReconciledRecordSet {
            table: table_name.to_string(),
            columns: target.columns().to_vec(),
            rows,
        })
    }

    fn plan(
        &self,
        dataset: &str,
        table_name: &str,
        target: &Schema,
        source: &[ColumnDef],
    ) -> Result<Vec<Projection>, ReconcileError> {
        // canonical name -> (source index, type, source names)
        let mut renamed: HashMap<&str, (usize, ColumnType, Vec<String>)> = HashMap::new();
        for (idx, column) in source.iter().enumerate() {
            let canonical = self.renames.canonical(&column.name);
            let entry = renamed
                .entry(canonical)
                .or_insert_with(|| (idx, column.ty, Vec::new()));
            entry.2.push(column.name.clone());
        }

        // Only a conflict if the target actually uses the column
        for (column, (_, _, sources)) in &renamed {
            if sources.len() > 1 && target.contains(column) {
                return Err(ReconcileError::DuplicateColumn {
                    dataset: dataset.to_string(),
                    column: column.to_string(),
                    sources: sources.clone(),
                });
            }
        }

        let split = &self.split;
        let derive_from = if target.contains(&split.date)
            && target.contains(&split.time)
            && !renamed.contains_key(split.date.as_str())
            && !renamed.contains_key(split.time.as_str())
        {
            match renamed.get(split.instant.as_str()) {
                Some((idx, ColumnType::DateTime, _)) => Some(*idx),
                Some((_, found, _)) => {
                    return Err(ReconcileError::TypeMismatch {
                        dataset: dataset.to_string(),
                        table: table_name.to_string(),
                        column: split.instant.clone(),
                        expected: ColumnType::DateTime,
                        found: *found,
                    })
                }
                None => None,
            }
        } else {
            None
        };

        let mut plan = Vec::with_capacity(target.len());
        for column in target.columns() {
            let projection = match (renamed.get(column.name.as_str()), derive_from) {
                (Some((idx, found, _)), _) => {
                    if *found != column.ty {
                        return Err(ReconcileError::TypeMismatch {
                            dataset: dataset.to_string(),
                            table: table_name.to_string(),
                            column: column.name.clone(),
                            expected: column.ty,
                            found: *found,
                        });
                    }
                    Projection::Column(*idx)
                }
                (None, Some(idx)) if column.name == split.date => Projection::DateOf(idx),
                (None, Some(idx)) if column.name == split.time => Projection::TimeOf(idx),
                _ => {
                    return Err(ReconcileError::MissingColumn {
                        dataset: dataset.to_string(),
                        table: table_name.to_string(),
                        column: column.name.clone(),
                    })
                }
            };
            plan.push(projection);
        }

        if derive_from.is_some() {
            debug!(dataset, table = table_name, "Deriving date and time from instant");
        }
        Ok(plan)
    }
}

fn empty_set(table: &str, schema: &Schema) -> ReconciledRecordSet {
    ReconciledRecordSet::new(table, schema.columns().to_vec())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::DatasetCatalog;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::BTreeSet;
    use std::io::Write;
    use tempfile::TempDir;

    const RAW_HEADER: &str = "id_subsistema;nom_subsistema;din_instante;val_gerhidraulica;\
        val_gertermica;val_gereolica;val_gersolar;val_carga;val_intercambio";

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn raw_file(dir: &TempDir, name: &str, rows: &[&str]) -> PathBuf {
        let mut content = format!("{}\n", RAW_HEADER);
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        write(dir, name, &content)
    }

    #[test]
    fn test_output_columns_match_canonical_schema_for_every_dataset() {
        let catalog = DatasetCatalog::ons();
        let reconciler = ColumnReconciler::ons();

        for spec in catalog.datasets() {
            let table = TypedTable {
                columns: spec.source_schema.columns().to_vec(),
                rows: vec![],
            };
            let set = reconciler
                .project(&spec.identifier, &spec.target_table, &spec.canonical_schema, &table)
                .unwrap();
            let got: BTreeSet<_> = set.column_names().collect();
            let want: BTreeSet<_> = spec.canonical_schema.names().collect();
            assert_eq!(got, want, "dataset {}", spec.identifier);

            let refs = reconciler
                .project(
                    &spec.identifier,
                    &catalog.reference().target_table,
                    &catalog.reference().schema,
                    &table,
                )
                .unwrap();
            assert_eq!(refs.columns.len(), 2);
        }
    }

    #[test]
    fn test_instant_is_split_into_date_and_time() {
        let dir = TempDir::new().unwrap();
        let path = raw_file(
            &dir,
            "BALANCO_ENERGIA_SUBSISTEMA_2024.csv",
            &["SE;Sudeste;2024-01-05T13:30:00;1;2;3;4;5;6"],
        );
        let catalog = DatasetCatalog::ons();
        let spec = catalog.resolve("BALANCO_ENERGIA_SUBSISTEMA").unwrap();

        let set = ColumnReconciler::ons()
            .reconcile_dataset(spec, catalog.reference(), &[path])
            .unwrap()
            .facts;

        assert_eq!(
            set.value(0, "data"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()))
        );
        assert_eq!(
            set.value(0, "hora"),
            Some(&Value::Time(NaiveTime::from_hms_opt(13, 30, 0).unwrap()))
        );
        assert_eq!(set.value(0, "valor_carga"), Some(&Value::Float(5.0)));
        assert!(set.column_index("instante").is_none());
    }

    #[test]
    fn test_explicit_date_column_is_not_overwritten() {
        let source = vec![
            ColumnDef::new("instante", ColumnType::DateTime),
            ColumnDef::new("data", ColumnType::Date),
            ColumnDef::new("hora", ColumnType::Time),
        ];
        let target = Schema::new([("data", ColumnType::Date), ("hora", ColumnType::Time)]);
        let explicit_date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let explicit_time = NaiveTime::from_hms_opt(0, 30, 0).unwrap();
        let table = TypedTable {
            columns: source,
            rows: vec![vec![
                Value::DateTime(
                    NaiveDate::from_ymd_opt(2024, 1, 5)
                        .unwrap()
                        .and_hms_opt(13, 30, 0)
                        .unwrap(),
                ),
                Value::Date(explicit_date),
                Value::Time(explicit_time),
            ]],
        };

        let set = ColumnReconciler::ons()
            .project("test", "t", &target, &table)
            .unwrap();
        assert_eq!(set.rows[0], vec![Value::Date(explicit_date), Value::Time(explicit_time)]);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = raw_file(
            &dir,
            "BALANCO_ENERGIA_SUBSISTEMA_2023.csv",
            &[
                "N;Norte;2023-03-01 00:00:00;10;;1.5;0;300;-20",
                "S;Sul;2023-03-01 01:00:00;11;2;1.5;0;;",
            ],
        );
        let catalog = DatasetCatalog::ons();
        let spec = catalog.resolve("BALANCO_ENERGIA_SUBSISTEMA").unwrap();
        let reconciler = ColumnReconciler::ons();

        let first = reconciler
            .reconcile_dataset(spec, catalog.reference(), &[path.clone()])
            .unwrap();
        let second = reconciler
            .reconcile_dataset(spec, catalog.reference(), &[path])
            .unwrap();
        assert_eq!(first.facts, second.facts);
        assert_eq!(first.reference, second.reference);
        assert_eq!(first.facts.value(1, "valor_intercambio"), Some(&Value::Null));
    }

    #[test]
    fn test_files_are_concatenated_in_caller_order() {
        let dir = TempDir::new().unwrap();
        let later = raw_file(
            &dir,
            "BALANCO_ENERGIA_SUBSISTEMA_2024.csv",
            &["SE;Sudeste;2024-01-01 00:00:00;1;1;1;1;1;1"],
        );
        let earlier = raw_file(
            &dir,
            "BALANCO_ENERGIA_SUBSISTEMA_2023.csv",
            &[
                "N;Norte;2023-01-01 00:00:00;1;1;1;1;1;1",
                "S;Sul;2023-01-01 00:00:00;1;1;1;1;1;1",
            ],
        );
        let catalog = DatasetCatalog::ons();
        let spec = catalog.resolve("BALANCO_ENERGIA_SUBSISTEMA").unwrap();

        let dataset = ColumnReconciler::ons()
            .reconcile_dataset(spec, catalog.reference(), &[later, earlier])
            .unwrap();
        let ids = |set: &ReconciledRecordSet| -> Vec<String> {
            (0..set.len())
                .map(|i| set.value(i, "id_subsistema").unwrap().to_string())
                .collect()
        };
        assert_eq!(ids(&dataset.facts), vec!["SE", "N", "S"]);
        assert_eq!(ids(&dataset.reference), vec!["SE", "N", "S"]);
    }

    #[test]
    fn test_verified_feed_populates_reference_rows() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "br_ons_estimativa_custos_custo_marginal_operacao_semi_horario.csv",
            "data,hora,id_subsistema,subsistema,custo_marginal_operacao\n\
             2024-01-05,13:30:00,SE,Sudeste,120.5\n",
        );
        let catalog = DatasetCatalog::ons();
        let spec = catalog
            .resolve_file(&path)
            .unwrap();

        let dataset = ColumnReconciler::ons()
            .reconcile_dataset(spec, catalog.reference(), &[path])
            .unwrap();
        assert_eq!(dataset.facts.len(), 1);
        assert_eq!(
            dataset.reference.rows[0],
            vec![Value::Text("SE".into()), Value::Text("Sudeste".into())]
        );
    }

    #[test]
    fn test_missing_canonical_column_is_an_error() {
        let target = Schema::new([("id_subsistema", ColumnType::String), ("usina", ColumnType::String)]);
        let table = TypedTable {
            columns: vec![ColumnDef::new("id_subsistema", ColumnType::String)],
            rows: vec![],
        };
        let err = ColumnReconciler::ons()
            .project("test", "t", &target, &table)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::MissingColumn { column, .. } if column == "usina"));
    }

    #[test]
    fn test_two_sources_for_one_target_column_is_an_error() {
        let target = Schema::new([("geracao_solar", ColumnType::Float64)]);
        let table = TypedTable {
            columns: vec![
                ColumnDef::new("val_gersolar", ColumnType::Float64),
                ColumnDef::new("geracao_fotovoltaica_verificada", ColumnType::Float64),
            ],
            rows: vec![],
        };
        let err = ColumnReconciler::ons()
            .project("test", "t", &target, &table)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::DuplicateColumn { .. }));
    }
}
