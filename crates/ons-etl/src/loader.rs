//! Table loading against live database metadata
//!
//! Metadata is reflected from `information_schema` inside the run transaction.
//! Each record set goes in with one `INSERT ... SELECT * FROM UNNEST(...)`
//! statement, one array parameter per column, so a table is written in a single
//! round trip regardless of its row count. The loader never commits or rolls
//! back; the caller owns the transaction.

use crate::catalog::ColumnType;
use crate::error::LoadError;
use crate::records::{ReconciledRecordSet, Value};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// A column as reflected from the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    /// Identity or serial column; always assigned by the database
    pub is_generated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnMeta>,
}

impl TableMetadata {
    /// Columns the caller must supply
    pub fn insertion_columns(&self) -> impl Iterator<Item = &ColumnMeta> {
        self.columns.iter().filter(|c| !c.is_generated)
    }
}

/// Every table of the current schema
#[derive(Debug, Clone, Default)]
pub struct SchemaMetadata {
    tables: HashMap<String, TableMetadata>,
}

impl SchemaMetadata {
    pub async fn reflect(tx: &mut Transaction<'_, Postgres>) -> Result<Self, LoadError> {
        let rows: Vec<(String, String, bool)> = sqlx::query_as(
            r#"
            SELECT
                table_name::text,
                column_name::text,
                (is_identity = 'YES' OR COALESCE(column_default, '') LIKE 'nextval(%') AS is_generated
            FROM information_schema.columns
            WHERE table_schema = current_schema()
            ORDER BY table_name, ordinal_position
            "#,
        )
        .fetch_all(&mut **tx)
        .await
        .map_err(LoadError::Reflect)?;

        let mut tables: HashMap<String, TableMetadata> = HashMap::new();
        for (table, column, is_generated) in rows {
            tables
                .entry(table.clone())
                .or_insert_with(|| TableMetadata {
                    name: table,
                    columns: Vec::new(),
                })
                .columns
                .push(ColumnMeta {
                    name: column,
                    is_generated,
                });
        }

        debug!(tables = tables.len(), "Reflected database metadata");
        Ok(Self { tables })
    }

    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

impl FromIterator<TableMetadata> for SchemaMetadata {
    fn from_iter<I: IntoIterator<Item = TableMetadata>>(iter: I) -> Self {
        Self {
            tables: iter.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }
}

/// One typed array parameter of the bulk insert
#[derive(Debug, Clone, PartialEq)]
enum ColumnArray {
    Text(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    Time(Vec<Option<NaiveTime>>),
    DateTime(Vec<Option<NaiveDateTime>>),
    Float(Vec<Option<f64>>),
}

impl ColumnArray {
    fn with_capacity(ty: ColumnType, capacity: usize) -> Self {
        match ty {
            ColumnType::String => Self::Text(Vec::with_capacity(capacity)),
            ColumnType::Date => Self::Date(Vec::with_capacity(capacity)),
            ColumnType::Time => Self::Time(Vec::with_capacity(capacity)),
            ColumnType::DateTime => Self::DateTime(Vec::with_capacity(capacity)),
            ColumnType::Float64 => Self::Float(Vec::with_capacity(capacity)),
        }
    }

    fn sql_type(&self) -> &'static str {
        match self {
            Self::Text(_) => "text[]",
            Self::Date(_) => "date[]",
            Self::Time(_) => "time[]",
            Self::DateTime(_) => "timestamp[]",
            Self::Float(_) => "float8[]",
        }
    }

    /// Push `value`, or hand it back when it does not belong in this array
    fn push<'v>(&mut self, value: &'v Value) -> Result<(), &'v Value> {
        match (self, value) {
            (Self::Text(v), Value::Null) => v.push(None),
            (Self::Date(v), Value::Null) => v.push(None),
            (Self::Time(v), Value::Null) => v.push(None),
            (Self::DateTime(v), Value::Null) => v.push(None),
            (Self::Float(v), Value::Null) => v.push(None),
            (Self::Text(v), Value::Text(s)) => v.push(Some(s.clone())),
            (Self::Date(v), Value::Date(d)) => v.push(Some(*d)),
            (Self::Time(v), Value::Time(t)) => v.push(Some(*t)),
            (Self::DateTime(v), Value::DateTime(dt)) => v.push(Some(*dt)),
            (Self::Float(v), Value::Float(f)) => v.push(Some(*f)),
            (_, other) => return Err(other),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TableLoader {
    metadata: SchemaMetadata,
}

impl TableLoader {
    pub fn new(metadata: SchemaMetadata) -> Self {
        Self { metadata }
    }

    /// Insert every row of `records` into `table` inside `tx`, returning the
    /// number of rows written
    pub async fn load(
        &self,
        table: &str,
        records: &ReconciledRecordSet,
        dedup: bool,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<u64, LoadError> {
        let (sql, arrays) = self.prepare(table, records, dedup)?;

        let rows = arrays.first().map(array_len).unwrap_or_default();
        if rows == 0 {
            info!(table, "No rows to insert");
            return Ok(0);
        }

        info!(table, rows, "Inserting rows");
        let mut query = sqlx::query(&sql);
        for array in arrays {
            query = match array {
                ColumnArray::Text(v) => query.bind(v),
                ColumnArray::Date(v) => query.bind(v),
                ColumnArray::Time(v) => query.bind(v),
                ColumnArray::DateTime(v) => query.bind(v),
                ColumnArray::Float(v) => query.bind(v),
            };
        }

        let result = query
            .execute(&mut **tx)
            .await
            .map_err(|source| LoadError::Insert {
                table: table.to_string(),
                source,
            })?;
        Ok(result.rows_affected())
    }

    /// Build the insert statement and its array parameters without touching
    /// the database
    fn prepare(
        &self,
        table: &str,
        records: &ReconciledRecordSet,
        dedup: bool,
    ) -> Result<(String, Vec<ColumnArray>), LoadError> {
        let meta = self
            .metadata
            .table(table)
            .ok_or_else(|| LoadError::MissingTable {
                table: table.to_string(),
            })?;

        let mut targets = Vec::new();
        for column in meta.insertion_columns() {
            let idx = records
                .column_index(&column.name)
                .ok_or_else(|| LoadError::MissingColumn {
                    table: table.to_string(),
                    column: column.name.clone(),
                })?;
            targets.push((column.name.as_str(), idx, records.columns[idx].ty));
        }

        let rows: Vec<&Vec<Value>> = if dedup {
            let mut seen = HashSet::with_capacity(records.len());
            records.rows.iter().filter(|row| seen.insert(*row)).collect()
        } else {
            records.rows.iter().collect()
        };
        if dedup && rows.len() < records.len() {
            debug!(
                table,
                before = records.len(),
                after = rows.len(),
                "Dropped duplicate rows"
            );
        }

        let mut arrays: Vec<ColumnArray> = targets
            .iter()
            .map(|(_, _, ty)| ColumnArray::with_capacity(*ty, rows.len()))
            .collect();
        for row in &rows {
            for ((name, idx, ty), array) in targets.iter().zip(arrays.iter_mut()) {
                let pushed = match row.get(*idx) {
                    Some(value) => array.push(value).map_err(Value::kind_name),
                    None => array.push(&Value::Null).map_err(Value::kind_name),
                };
                pushed.map_err(|found| LoadError::ValueType {
                    table: table.to_string(),
                    column: name.to_string(),
                    expected: *ty,
                    found,
                })?;
            }
        }

        let columns = targets
            .iter()
            .map(|(name, _, _)| quote_ident(name))
            .collect::<Vec<_>>()
            .join(", ");
        let params = arrays
            .iter()
            .enumerate()
            .map(|(i, array)| format!("${}::{}", i + 1, array.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) SELECT * FROM UNNEST({})",
            quote_ident(table),
            columns,
            params
        );

        Ok((sql, arrays))
    }
}

fn array_len(array: &ColumnArray) -> usize {
    match array {
        ColumnArray::Text(v) => v.len(),
        ColumnArray::Date(v) => v.len(),
        ColumnArray::Time(v) => v.len(),
        ColumnArray::DateTime(v) => v.len(),
        ColumnArray::Float(v) => v.len(),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
