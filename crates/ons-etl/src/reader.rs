//! Delimited file reader with an explicit column schema
//!
//! Only the declared columns are selected; anything else in the header is
//! ignored. Every declared column must be present, and every non-empty cell
//! must parse as its declared type.

use crate::catalog::{ColumnType, Schema};
use crate::error::SchemaMismatchError;
use crate::records::{TypedTable, Value};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::path::Path;
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, Copy, Default)]
pub struct TabularReader;

impl TabularReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read(
        &self,
        path: &Path,
        schema: &Schema,
        delimiter: u8,
    ) -> Result<TypedTable, SchemaMismatchError> {
        let malformed = |source| SchemaMismatchError::Malformed {
            file: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_path(path)
            .map_err(malformed)?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(malformed)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut selection = Vec::with_capacity(schema.len());
        for column in schema.columns() {
            let idx = headers
                .iter()
                .position(|h| h == &column.name)
                .ok_or_else(|| SchemaMismatchError::MissingColumn {
                    file: path.to_path_buf(),
                    column: column.name.clone(),
                })?;
            selection.push((idx, column));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(malformed)?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();

            let mut row = Vec::with_capacity(selection.len());
            for (idx, column) in &selection {
                let raw = record.get(*idx).unwrap_or_default();
                let value = parse_value(raw, column.ty).ok_or_else(|| {
                    SchemaMismatchError::InvalidValue {
                        file: path.to_path_buf(),
                        line,
                        column: column.name.clone(),
                        value: raw.to_string(),
                        expected: column.ty,
                    }
                })?;
                row.push(value);
            }
            rows.push(row);
        }

        debug!(file = %path.display(), rows = rows.len(), "Read delimited file");

        Ok(TypedTable {
            columns: schema.columns().to_vec(),
            rows,
        })
    }
}

/// Parse one cell. Empty cells are NULL; `None` means the text does not
/// parse as `ty`.
pub fn parse_value(raw: &str, ty: ColumnType) -> Option<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(Value::Null);
    }

    match ty {
        ColumnType::String => Some(Value::Text(raw.to_string())),
        ColumnType::Float64 => raw.parse::<f64>().ok().map(Value::Float),
        ColumnType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .ok()
            .map(Value::Date),
        ColumnType::Time => TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
            .map(Value::Time),
        ColumnType::DateTime => DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(Value::DateTime),
    }
}
