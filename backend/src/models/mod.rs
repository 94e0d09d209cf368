//! Domain models for the rulemap transformation pipeline.
//!
//! - [`Cell`] - one scalar value of an input row
//! - [`Record`] - one input row (ordered column → cell)
//! - [`OutputRecord`] - one output row (ordered target column → string)

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Cell
// =============================================================================

/// A scalar value read from one input column.
///
/// `Missing` is a value in its own right: a record carries the key with a
/// missing cell rather than dropping the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    #[default]
    Missing,
}

impl Cell {
    /// Build a cell from a raw field. Empty (or blank) fields are missing.
    pub fn from_raw(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Cell::Missing
        } else {
            Cell::Text(raw.to_string())
        }
    }

    /// Build a cell from a JSON scalar. Arrays and objects are rendered as JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Cell::Missing,
            serde_json::Value::String(s) => Cell::from_raw(s),
            serde_json::Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Missing),
            serde_json::Value::Bool(b) => Cell::Text(b.to_string()),
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    /// String form used for output and lookup keys; missing renders as `""`.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Missing => Ok(()),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

// =============================================================================
// Record
// =============================================================================

/// One input row: column name → cell, in header order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Cell)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; replaces the cell if the column already exists.
    pub fn with(mut self, column: impl Into<String>, cell: impl Into<Cell>) -> Self {
        self.insert(column, cell);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, cell: impl Into<Cell>) {
        let column = column.into();
        let cell = cell.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = cell,
            None => self.fields.push((column, cell)),
        }
    }

    /// Cell for a column, `None` if the column is not in this record's schema.
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Rendered value of a column; absent and missing both give `""`.
    pub fn text(&self, column: &str) -> String {
        self.get(column).map(Cell::render).unwrap_or_default()
    }

    /// Present and not missing.
    pub fn has_value(&self, column: &str) -> bool {
        self.get(column).is_some_and(|c| !c.is_missing())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a record from a flat JSON object. Non-objects give an empty record.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut record = Record::new();
        if let Some(obj) = value.as_object() {
            for (k, v) in obj {
                record.insert(k.clone(), Cell::from_json(v));
            }
        }
        record
    }

    /// JSON object view, missing cells as `null`. Used for LLM prompts.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| {
                let json = match v {
                    Cell::Missing => serde_json::Value::Null,
                    Cell::Number(n) => serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null),
                    Cell::Text(s) => serde_json::Value::String(s.clone()),
                };
                (k.clone(), json)
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<Cell>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

// =============================================================================
// OutputRecord
// =============================================================================

/// One output row: target column → computed value.
///
/// A column keeps the position of its first assignment; assigning the same
/// column again only replaces the value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputRecord {
    values: Vec<(String, String)>,
}

impl OutputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &str, value: String) {
        match self.values.iter_mut().find(|(c, _)| c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column.to_string(), value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values laid out along `columns`; columns this record lacks are `""`.
    pub fn row(&self, columns: &[String]) -> Vec<String> {
        columns
            .iter()
            .map(|c| self.get(c).unwrap_or_default().to_string())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OutputRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut out = OutputRecord::new();
        for (k, v) in iter {
            out.set(&k.into(), v.into());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_field_is_missing() {
        assert_eq!(Cell::from_raw(""), Cell::Missing);
        assert_eq!(Cell::from_raw("   "), Cell::Missing);
        assert_eq!(Cell::from_raw(" x "), Cell::Text(" x ".to_string()));
    }

    #[test]
    fn test_number_rendering() {
        assert_eq!(Cell::Number(42.0).render(), "42");
        assert_eq!(Cell::Number(-3.0).render(), "-3");
        assert_eq!(Cell::Number(2.5).render(), "2.5");
        assert_eq!(Cell::Missing.render(), "");
    }

    #[test]
    fn test_record_missing_vs_absent() {
        let record = Record::new().with("First", "Ann").with("Last", Cell::Missing);

        assert!(record.get("Last").is_some());
        assert!(!record.has_value("Last"));
        assert!(record.get("Middle").is_none());
        assert_eq!(record.text("Last"), "");
        assert_eq!(record.text("Middle"), "");
    }

    #[test]
    fn test_record_from_json() {
        let record = Record::from_json(&json!({ "Gender": "M", "Age": 31, "Note": null }));
        assert_eq!(record.text("Gender"), "M");
        assert_eq!(record.text("Age"), "31");
        assert_eq!(record.get("Note"), Some(&Cell::Missing));
    }

    #[test]
    fn test_output_record_keeps_first_position() {
        let mut out = OutputRecord::new();
        out.set("X", "v1".to_string());
        out.set("Y", "y".to_string());
        out.set("X", "v2".to_string());

        let columns: Vec<&str> = out.columns().collect();
        assert_eq!(columns, vec!["X", "Y"]);
        assert_eq!(out.get("X"), Some("v2"));
    }

    #[test]
    fn test_output_row_layout() {
        let out: OutputRecord = [("B", "2")].into_iter().collect();
        let row = out.row(&["A".to_string(), "B".to_string()]);
        assert_eq!(row, vec!["".to_string(), "2".to_string()]);
    }
}
