//! JSON form payload adapter
//!
//! Accepts a single JSON object (the shape a form submission or what-if request
//! carries) or an array of objects. Keys may use the camelCase form spellings
//! or the canonical column names.

use super::{canonicalize, RecordAdapter};
use crate::error::{Result, ScholarError};
use crate::table::Cell;
use crate::types::RawStudentRecord;
use serde_json::{Map, Value};

/// Adapter for JSON student payloads
pub struct JsonRecordAdapter;

impl JsonRecordAdapter {
    /// Convert one JSON object into a canonical record
    pub fn from_value(value: &Value) -> Result<RawStudentRecord> {
        let object = value.as_object().ok_or_else(|| {
            ScholarError::SchemaMismatch("student payload must be a JSON object".to_string())
        })?;
        Self::from_object(object)
    }

    fn from_object(object: &Map<String, Value>) -> Result<RawStudentRecord> {
        canonicalize(|key| object.get(key).map(json_cell))
    }
}

impl RecordAdapter for JsonRecordAdapter {
    fn parse(&self, input: &str) -> Result<Vec<RawStudentRecord>> {
        let value: Value = serde_json::from_str(input)?;
        match &value {
            Value::Array(items) => items.iter().map(Self::from_value).collect(),
            _ => Ok(vec![Self::from_value(&value)?]),
        }
    }
}

fn json_cell(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Missing,
        Value::Number(n) => n.as_f64().map_or(Cell::Missing, Cell::Number),
        Value::String(s) => Cell::Text(s.clone()),
        Value::Bool(true) => Cell::from("Yes"),
        Value::Bool(false) => Cell::from("No"),
        other => Cell::Text(other.to_string()),
    }
}
