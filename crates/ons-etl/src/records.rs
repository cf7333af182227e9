//! Typed rows flowing from the reader to the loader

use crate::catalog::ColumnDef;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// A single cell. `Null` stands for an empty cell in the source file.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Float(f64),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Text(_) => "string",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::Float(_) => "float64",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

// Floats compare by bit pattern so rows can be hashed for dedup.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Text(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Time(t) => t.hash(state),
            Value::DateTime(dt) => dt.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::DateTime(dt) => write!(f, "{}", dt),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Output of the tabular reader: declared columns only, in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct TypedTable {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Value>>,
}

impl TypedTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Rows in canonical column order bound to exactly one target table
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRecordSet {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Value>>,
}

impl ReconciledRecordSet {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            table: table.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Append the rows of `other`, which must share this set's column layout
    pub fn append(&mut self, other: ReconciledRecordSet) {
        debug_assert_eq!(self.columns, other.columns);
        self.rows.extend(other.rows);
    }

    /// Drop repeated rows, keeping the first occurrence of each
    pub fn distinct(mut self) -> Self {
        let mut seen = HashSet::with_capacity(self.rows.len());
        self.rows.retain(|row| seen.insert(row.clone()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnType;

    fn subsystem_set(rows: &[(&str, &str)]) -> ReconciledRecordSet {
        let mut set = ReconciledRecordSet::new(
            "subsistema",
            vec![
                ColumnDef::new("id_subsistema", ColumnType::String),
                ColumnDef::new("nome_subsistema", ColumnType::String),
            ],
        );
        for (id, name) in rows {
            set.rows
                .push(vec![Value::Text(id.to_string()), Value::Text(name.to_string())]);
        }
        set
    }

    #[test]
    fn test_distinct_keeps_first_seen_order() {
        let set = subsystem_set(&[
            ("SE", "Sudeste"),
            ("S", "Sul"),
            ("SE", "Sudeste"),
            ("N", "Norte"),
            ("S", "Sul"),
        ])
        .distinct();

        let ids: Vec<_> = (0..set.len())
            .map(|i| set.value(i, "id_subsistema").map(ToString::to_string))
            .collect();
        assert_eq!(
            ids,
            vec![Some("SE".into()), Some("S".into()), Some("N".into())]
        );
    }

    #[test]
    fn test_float_values_hash_by_bits() {
        let a = Value::Float(1.5);
        let b = Value::Float(1.5);
        assert_eq!(a, b);
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Float(1.0), Value::Text("1".into()));
    }
}
