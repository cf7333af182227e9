//! Dataset catalog: which file feeds which table, and with which columns
//!
//! The catalog is built once at startup and never mutated. Each [`DatasetSpec`]
//! carries two schemas: the source schema the reader selects from the file, and
//! the canonical schema of the target table the reconciler must produce.

use crate::error::CatalogError;
use serde::Serialize;
use std::path::Path;

/// Primitive column types understood by the reader and the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Date,
    Time,
    DateTime,
    Float64,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::String => write!(f, "string"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Time => write!(f, "time"),
            ColumnType::DateTime => write!(f, "datetime"),
            ColumnType::Float64 => write!(f, "float64"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered column name -> type mapping
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, ty)| ColumnDef::new(name, ty))
                .collect(),
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl From<Vec<ColumnDef>> for Schema {
    fn from(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }
}

/// How a downloaded file name is matched against a dataset identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMatch {
    /// File stem equals the identifier
    Exact,
    /// File stem starts with the identifier (e.g. one file per year)
    Prefix,
}

#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub identifier: String,
    pub target_table: String,
    pub source_schema: Schema,
    pub canonical_schema: Schema,
    pub delimiter: u8,
    pub file_match: FileMatch,
}

impl DatasetSpec {
    fn matches(&self, stem: &str) -> bool {
        match self.file_match {
            FileMatch::Exact => stem == self.identifier,
            FileMatch::Prefix => stem.starts_with(&self.identifier),
        }
    }
}

/// The dimension table every fact table points at
#[derive(Debug, Clone)]
pub struct ReferenceSpec {
    pub target_table: String,
    pub schema: Schema,
    /// Primary key; fact tables reference it by the same name
    pub key_column: String,
}

#[derive(Debug, Clone)]
pub struct DatasetCatalog {
    datasets: Vec<DatasetSpec>,
    reference: ReferenceSpec,
}

impl DatasetCatalog {
    pub fn new(datasets: Vec<DatasetSpec>, reference: ReferenceSpec) -> Self {
        Self {
            datasets,
            reference,
        }
    }

    /// Look up a dataset by identifier (a file stem). Exact entries win over
    /// prefix entries.
    pub fn resolve(&self, identifier: &str) -> Result<&DatasetSpec, CatalogError> {
        self.datasets
            .iter()
            .find(|d| d.file_match == FileMatch::Exact && d.matches(identifier))
            .or_else(|| self.datasets.iter().find(|d| d.matches(identifier)))
            .ok_or_else(|| CatalogError::UnknownDataset {
                identifier: identifier.to_string(),
            })
    }

    /// Resolve a downloaded file by its name, ignoring every suffix
    pub fn resolve_file(&self, path: &Path) -> Result<&DatasetSpec, CatalogError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = file_name.split('.').next().unwrap_or_default();
        self.resolve(stem)
    }

    pub fn datasets(&self) -> &[DatasetSpec] {
        &self.datasets
    }

    pub fn reference(&self) -> &ReferenceSpec {
        &self.reference
    }

    /// Datasets published by ONS, as loaded into the `subsistema` schema
    pub fn ons() -> Self {
        use ColumnType::{Date, DateTime, Float64, String as Text, Time};

        let reference = ReferenceSpec {
            target_table: "subsistema".to_string(),
            schema: Schema::new([("id_subsistema", Text), ("nome_subsistema", Text)]),
            key_column: "id_subsistema".to_string(),
        };

        let datasets = vec![
            DatasetSpec {
                identifier: "BALANCO_ENERGIA_SUBSISTEMA".to_string(),
                target_table: "balanco_subsistema_horario".to_string(),
                source_schema: Schema::new([
                    ("id_subsistema", Text),
                    ("nom_subsistema", Text),
                    ("din_instante", DateTime),
                    ("val_gerhidraulica", Float64),
                    ("val_gertermica", Float64),
                    ("val_gereolica", Float64),
                    ("val_gersolar", Float64),
                    ("val_carga", Float64),
                    ("val_intercambio", Float64),
                ]),
                canonical_schema: Schema::new([
                    ("id_subsistema", Text),
                    ("data", Date),
                    ("hora", Time),
                    ("geracao_hidraulica", Float64),
                    ("geracao_termica", Float64),
                    ("geracao_eolica", Float64),
                    ("geracao_solar", Float64),
                    ("valor_carga", Float64),
                    ("valor_intercambio", Float64),
                ]),
                delimiter: b';',
                file_match: FileMatch::Prefix,
            },
            DatasetSpec {
                identifier: "br_ons_estimativa_custos_balanco_energia_subsistemas_dessem"
                    .to_string(),
                target_table: "balanco_subsistema_semihorario".to_string(),
                source_schema: Schema::new([
                    ("data", Date),
                    ("hora", Time),
                    ("id_subsistema", Text),
                    ("subsistema", Text),
                    ("usina_hidraulica_verificada", Float64),
                    ("geracao_eolica_verificada", Float64),
                    ("geracao_fotovoltaica_verificada", Float64),
                    ("geracao_usina_termica_verificada", Float64),
                    ("geracao_pequena_usina_hidraulica_verificada", Float64),
                    ("geracao_pequena_usina_termica_verificada", Float64),
                ]),
                canonical_schema: Schema::new([
                    ("id_subsistema", Text),
                    ("data", Date),
                    ("hora", Time),
                    ("geracao_hidraulica", Float64),
                    ("geracao_eolica", Float64),
                    ("geracao_solar", Float64),
                    ("geracao_termica", Float64),
                    ("geracao_hidraulica_pequena_usina", Float64),
                    ("geracao_termica_pequena_usina", Float64),
                ]),
                delimiter: b',',
                file_match: FileMatch::Exact,
            },
            DatasetSpec {
                identifier: "br_ons_estimativa_custos_custo_marginal_operacao_semanal"
                    .to_string(),
                target_table: "custo_marginal_operacao_semanal".to_string(),
                source_schema: Schema::new([
                    ("data", Date),
                    ("id_subsistema", Text),
                    ("subsistema", Text),
                    ("custo_marginal_operacao_semanal", Float64),
                    ("custo_marginal_operacao_semanal_carga_leve", Float64),
                    ("custo_marginal_operacao_semanal_carga_media", Float64),
                    ("custo_marginal_operacao_semanal_carga_pesada", Float64),
                ]),
                canonical_schema: Schema::new([
                    ("id_subsistema", Text),
                    ("data", Date),
                    ("custo_marginal_operacao_semanal", Float64),
                    ("custo_marginal_operacao_semanal_carga_leve", Float64),
                    ("custo_marginal_operacao_semanal_carga_media", Float64),
                    ("custo_marginal_operacao_semanal_carga_pesada", Float64),
                ]),
                delimiter: b',',
                file_match: FileMatch::Exact,
            },
            DatasetSpec {
                identifier: "br_ons_estimativa_custos_custo_marginal_operacao_semi_horario"
                    .to_string(),
                target_table: "custo_marginal_operacao_semihorario".to_string(),
                source_schema: Schema::new([
                    ("data", Date),
                    ("hora", Time),
                    ("id_subsistema", Text),
                    ("subsistema", Text),
                    ("custo_marginal_operacao", Float64),
                ]),
                canonical_schema: Schema::new([
                    ("id_subsistema", Text),
                    ("data", Date),
                    ("hora", Time),
                    ("custo_marginal_operacao", Float64),
                ]),
                delimiter: b',',
                file_match: FileMatch::Exact,
            },
            DatasetSpec {
                identifier: "br_ons_estimativa_custos_custo_variavel_unitario_usinas_termicas"
                    .to_string(),
                target_table: "custo_variavel_unitario_usinas_termicas".to_string(),
                source_schema: Schema::new([
                    ("data_inicio", Date),
                    ("data_fim", Date),
                    ("semana_operativa", Text),
                    ("id_modelo_usina", Text),
                    ("id_subsistema", Text),
                    ("subsistema", Text),
                    ("usina", Text),
                    ("custo_variavel_unitario", Float64),
                ]),
                canonical_schema: Schema::new([
                    ("id_subsistema", Text),
                    ("id_modelo_usina", Text),
                    ("usina", Text),
                    ("semana_operativa", Text),
                    ("custo_variavel_unitario", Float64),
                    ("data_inicio", Date),
                    ("data_fim", Date),
                ]),
                delimiter: b',',
                file_match: FileMatch::Exact,
            },
        ];

        Self::new(datasets, reference)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_resolve_exact_identifier() {
        let catalog = DatasetCatalog::ons();
        let spec = catalog
            .resolve("br_ons_estimativa_custos_custo_marginal_operacao_semanal")
            .unwrap();
        assert_eq!(spec.target_table, "custo_marginal_operacao_semanal");
    }

    #[test]
    fn test_resolve_yearly_raw_files_by_prefix() {
        let catalog = DatasetCatalog::ons();
        let path = PathBuf::from("csv/balanco-energia/BALANCO_ENERGIA_SUBSISTEMA_2024.csv");
        let spec = catalog.resolve_file(&path).unwrap();
        assert_eq!(spec.target_table, "balanco_subsistema_horario");
        assert_eq!(spec.delimiter, b';');
    }

    #[test]
    fn test_exact_identifier_does_not_match_longer_stem() {
        let catalog = DatasetCatalog::ons();
        let err = catalog
            .resolve("br_ons_estimativa_custos_custo_marginal_operacao_semanal_v2")
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownDataset { .. }));
    }

    #[test]
    fn test_unknown_file_name_fails() {
        let catalog = DatasetCatalog::ons();
        let err = catalog
            .resolve_file(Path::new("csv/relatorio_anual.pdf"))
            .unwrap_err();
        assert!(err.to_string().contains("relatorio_anual"));
    }

    #[test]
    fn test_every_fact_table_carries_the_reference_key() {
        let catalog = DatasetCatalog::ons();
        let key = &catalog.reference().key_column;
        for spec in catalog.datasets() {
            assert!(
                spec.canonical_schema.contains(key),
                "{} lacks {}",
                spec.target_table,
                key
            );
        }
    }
}
