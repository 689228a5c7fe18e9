//! Reference statistics
//!
//! This module computes the fallback values used when an inference record is
//! missing a field: the median of each raw numeric column and the mode of each
//! categorical column of the reference table. The statistics are recomputed
//! whenever the reference table grows.

use crate::table::{Cell, Table};
use crate::types::{NumericField, CATEGORICAL_FIELDS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category used when the reference table has no value for a column
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Medians and modes of the reference table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStats {
    /// Median per raw numeric column
    medians: BTreeMap<String, f64>,
    /// Mode per categorical column
    modes: BTreeMap<String, String>,
    /// Number of reference rows the statistics were computed from
    row_count: usize,
}

impl ReferenceStats {
    /// Compute statistics from a reference table. Columns absent from the
    /// table are simply left out.
    pub fn from_table(table: &Table) -> Self {
        let medians = NumericField::ALL
            .iter()
            .filter_map(|field| {
                table
                    .median(field.column())
                    .map(|m| (field.column().to_string(), m))
            })
            .collect();

        let modes = CATEGORICAL_FIELDS
            .iter()
            .filter_map(|column| {
                table
                    .mode(column)
                    .map(|cell| (column.to_string(), cell.to_field()))
            })
            .collect();

        Self {
            medians,
            modes,
            row_count: table.len(),
        }
    }

    /// Median of a raw numeric field, if the reference table had one
    pub fn median(&self, field: NumericField) -> Option<f64> {
        self.medians.get(field.column()).copied()
    }

    /// Mode of a categorical column, if the reference table had one
    pub fn mode(&self, column: &str) -> Option<&str> {
        self.modes.get(column).map(String::as_str)
    }

    /// Mode of a categorical column, or `UNKNOWN_CATEGORY`
    pub fn mode_or_unknown(&self, column: &str) -> Cell {
        Cell::Text(self.mode(column).unwrap_or(UNKNOWN_CATEGORY).to_string())
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Load statistics from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize statistics to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
