//! Student record adapters
//!
//! This module provides adapters that parse incoming payloads (form-style JSON
//! objects, uploaded CSV tables) and map them to canonical `RawStudentRecord`s.
//! Key spellings are resolved once here through an explicit alias table, so
//! nothing downstream ever looks at a caller's field names.

mod delimited;
mod json;

pub use delimited::CsvRecordAdapter;
pub use json::JsonRecordAdapter;

use crate::error::{Result, ScholarError};
use crate::table::{Cell, FeatureRow};
use crate::types::{NumericField, RawStudentRecord, CATEGORICAL_FIELDS, FEATURE_NAMES};

/// Trait for record adapters
pub trait RecordAdapter {
    /// Parse a payload into canonical records
    fn parse(&self, input: &str) -> Result<Vec<RawStudentRecord>>;
}

/// Accepted spellings per numeric field, highest precedence first
pub const NUMERIC_ALIASES: [(NumericField, &[&str]); 7] = [
    (NumericField::HoursStudied, &["hoursStudied", "Hours_Studied", "studyHours"]),
    (NumericField::SleepHours, &["sleepHours", "Sleep_Hours"]),
    (NumericField::Attendance, &["attendance", "Attendance"]),
    (
        NumericField::TutoringSessions,
        &["tutoringSessions", "Tutoring_Sessions", "tutoring"],
    ),
    // the current exam score stands in for a missing previous score
    (
        NumericField::PreviousScores,
        &["previousScores", "Previous_Scores", "examScore", "Exam_Score"],
    ),
    (
        NumericField::PhysicalActivity,
        &["physicalActivity", "Physical_Activity"],
    ),
    (NumericField::ExamScore, &["Exam_Score", "examScore"]),
];

/// Accepted spellings per categorical field
pub const CATEGORICAL_ALIASES: [(&str, &[&str]); 13] = [
    ("Parental_Involvement", &["parentalInvolvement"]),
    ("Access_to_Resources", &["accessToResources"]),
    ("Extracurricular_Activities", &["extracurricularActivities"]),
    ("Motivation_Level", &["motivationLevel", "motivation"]),
    ("Internet_Access", &["internetAccess"]),
    ("Family_Income", &["familyIncome"]),
    ("Teacher_Quality", &["teacherQuality"]),
    ("School_Type", &["schoolType"]),
    ("Peer_Influence", &["peerInfluence"]),
    ("Learning_Disabilities", &["learningDisabilities"]),
    ("Parental_Education_Level", &["parentalEducationLevel"]),
    ("Distance_from_Home", &["distanceFromHome"]),
    ("Gender", &["gender"]),
];

/// Build a canonical record from any keyed source of cells.
///
/// `lookup` returns the cell stored under a caller key, if any. Numeric fields
/// take the first present alias; text that does not parse as a number is a
/// `SchemaMismatch`. Engineered feature columns are collected when present.
pub fn canonicalize<F>(lookup: F) -> Result<RawStudentRecord>
where
    F: Fn(&str) -> Option<Cell>,
{
    let mut record = RawStudentRecord::default();

    for (field, aliases) in NUMERIC_ALIASES {
        let value = first_present(&lookup, aliases)
            .map(|(key, cell)| numeric_cell(key, &cell))
            .transpose()?;
        record.set_numeric(field, value);
    }

    debug_assert_eq!(CATEGORICAL_ALIASES.len(), CATEGORICAL_FIELDS.len());
    for (canonical, aliases) in CATEGORICAL_ALIASES {
        let value = lookup(canonical)
            .filter(|c| !c.is_missing())
            .or_else(|| first_present(&lookup, aliases).map(|(_, cell)| cell));
        if let Some(cell) = value {
            record.categorical.insert(canonical.to_string(), cell.to_field());
        }
    }

    for name in FEATURE_NAMES {
        if let Some(cell) = lookup(name).filter(|c| !c.is_missing()) {
            let value = numeric_cell(name, &cell)?;
            record.engineered.insert(name.to_string(), value);
        }
    }

    Ok(record)
}

/// Canonical record from a name-keyed table row
pub fn record_from_row(row: &FeatureRow) -> Result<RawStudentRecord> {
    canonicalize(|key| row.get(key).cloned())
}

fn first_present<F>(lookup: &F, aliases: &[&'static str]) -> Option<(&'static str, Cell)>
where
    F: Fn(&str) -> Option<Cell>,
{
    aliases.iter().find_map(|key| {
        lookup(key)
            .filter(|cell| !cell.is_missing())
            .map(|cell| (*key, cell))
    })
}

fn numeric_cell(key: &str, cell: &Cell) -> Result<f64> {
    match cell {
        Cell::Number(value) => Ok(*value),
        Cell::Text(text) => text.trim().parse::<f64>().map_err(|_| {
            ScholarError::SchemaMismatch(format!("field '{key}' expects a number, got '{text}'"))
        }),
        Cell::Missing => Err(ScholarError::SchemaMismatch(format!(
            "field '{key}' is missing"
        ))),
    }
}
