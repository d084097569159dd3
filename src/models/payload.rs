use serde_json::Value;

use crate::util;

/// A single scalar as delivered by the upstream source
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Null,
}

impl Cell {
    /// Convert a JSON scalar; nested arrays and objects are kept as text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Null),
            Value::String(s) => Cell::Text(s.clone()),
            Value::Bool(b) => Cell::Number(if *b { 1.0 } else { 0.0 }),
            Value::Null => Cell::Null,
            other => Cell::Text(other.to_string()),
        }
    }

    /// Numeric view of the cell. Text is read with French number formatting.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => util::parse_number(s),
            Cell::Null => None,
        }
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Number(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Number(v as f64)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

/// Rows of cells plus the subject they were fetched for
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub subject: String,
    pub rows: Vec<Vec<Cell>>,
}

impl RawPayload {
    pub fn new(subject: &str, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            subject: subject.to_string(),
            rows,
        }
    }

    /// Build from a JSON `result` array. Rows may be arrays or objects; object
    /// values are taken in document order.
    pub fn from_json_rows(subject: &str, rows: &[Value]) -> Self {
        let rows = rows
            .iter()
            .map(|row| match row {
                Value::Array(cells) => cells.iter().map(Cell::from_json).collect(),
                Value::Object(map) => map.values().map(Cell::from_json).collect(),
                scalar => vec![Cell::from_json(scalar)],
            })
            .collect();

        Self::new(subject, rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
