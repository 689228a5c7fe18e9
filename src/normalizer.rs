//! Input normalization
//!
//! This module resolves a canonical record into the numeric inputs of feature
//! derivation:
//! - Absent numeric fields filled from reference medians
//! - Values clamped to documented physical ranges
//! - Absent categoricals filled from reference modes

use crate::baseline::ReferenceStats;
use crate::types::{
    NormalizedRecord, NumericField, RawStudentRecord, ResolvedInputs, CATEGORICAL_FIELDS,
};

/// Inclusive range a raw numeric field is clamped into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRange {
    pub min: f64,
    pub max: f64,
}

/// Hours studied per week
pub const HOURS_STUDIED_RANGE: FieldRange = FieldRange { min: 0.5, max: 168.0 };
/// Hours of sleep per night
pub const SLEEP_HOURS_RANGE: FieldRange = FieldRange { min: 0.5, max: 24.0 };
/// Attendance percentage
pub const ATTENDANCE_RANGE: FieldRange = FieldRange { min: 1.0, max: 100.0 };
/// Tutoring sessions per month
pub const TUTORING_RANGE: FieldRange = FieldRange { min: 0.0, max: 100.0 };
/// Previous score, 0-100 scale; below 10 is not realistic
pub const PREVIOUS_SCORE_RANGE: FieldRange = FieldRange { min: 10.0, max: 100.0 };
/// Hours of physical activity per week
pub const PHYSICAL_ACTIVITY_RANGE: FieldRange = FieldRange { min: 0.1, max: 168.0 };

/// Values used when neither the record nor the reference table has a field
const LAST_RESORT_DEFAULTS: [(NumericField, f64); 6] = [
    (NumericField::HoursStudied, 20.0),
    (NumericField::SleepHours, 7.0),
    (NumericField::Attendance, 80.0),
    (NumericField::TutoringSessions, 1.0),
    (NumericField::PreviousScores, 75.0),
    (NumericField::PhysicalActivity, 3.0),
];

/// Normalizer for converting canonical records to resolved inputs
pub struct Normalizer;

impl Normalizer {
    /// Normalize a record against the reference statistics. Never fails.
    pub fn normalize(record: &RawStudentRecord, stats: &ReferenceStats) -> NormalizedRecord {
        let mut imputed = Vec::new();
        let mut resolve = |field: NumericField, range: FieldRange| -> f64 {
            let value = match record.numeric(field).filter(|v| v.is_finite()) {
                Some(v) => v,
                None => {
                    imputed.push(field.column().to_string());
                    stats.median(field).unwrap_or_else(|| last_resort(field))
                }
            };
            value.clamp(range.min, range.max)
        };

        let inputs = ResolvedInputs {
            hours_studied: resolve(NumericField::HoursStudied, HOURS_STUDIED_RANGE),
            sleep_hours: resolve(NumericField::SleepHours, SLEEP_HOURS_RANGE),
            attendance: resolve(NumericField::Attendance, ATTENDANCE_RANGE),
            tutoring_sessions: resolve(NumericField::TutoringSessions, TUTORING_RANGE),
            previous_scores: resolve(NumericField::PreviousScores, PREVIOUS_SCORE_RANGE),
            physical_activity: resolve(NumericField::PhysicalActivity, PHYSICAL_ACTIVITY_RANGE),
        };

        let mut categorical = record.categorical.clone();
        for column in CATEGORICAL_FIELDS {
            if !categorical.contains_key(column) {
                imputed.push(column.to_string());
                let fallback = stats.mode_or_unknown(column).to_field();
                categorical.insert(column.to_string(), fallback);
            }
        }

        NormalizedRecord {
            inputs,
            categorical,
            imputed,
        }
    }
}

fn last_resort(field: NumericField) -> f64 {
    LAST_RESORT_DEFAULTS
        .iter()
        .find(|(f, _)| *f == field)
        .map_or(0.0, |(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    fn stats() -> ReferenceStats {
        let table = Table::from_reader(
            "Hours_Studied,Sleep_Hours,Attendance,Tutoring_Sessions,Previous_Scores,Physical_Activity,Gender\n\
             20,7,80,1,75,3,Male\n\
             22,6,90,2,80,4,Male\n\
             18,8,70,0,70,2,Female\n"
                .as_bytes(),
        )
        .unwrap();
        ReferenceStats::from_table(&table)
    }

    #[test]
    fn test_missing_fields_use_medians() {
        let record = RawStudentRecord {
            hours_studied: Some(10.0),
            ..Default::default()
        };
        let normalized = Normalizer::normalize(&record, &stats());

        assert_eq!(normalized.inputs.hours_studied, 10.0);
        assert_eq!(normalized.inputs.sleep_hours, 7.0);
        assert_eq!(normalized.inputs.attendance, 80.0);
        assert_eq!(normalized.categorical["Gender"], "Male");
        assert!(normalized.imputed.contains(&"Sleep_Hours".to_string()));
        assert!(!normalized.imputed.contains(&"Hours_Studied".to_string()));
    }

    #[test]
    fn test_values_are_clamped() {
        let record = RawStudentRecord {
            hours_studied: Some(0.0),
            sleep_hours: Some(-3.0),
            attendance: Some(0.0),
            previous_scores: Some(2.0),
            physical_activity: Some(0.0),
            tutoring_sessions: Some(-1.0),
            ..Default::default()
        };
        let inputs = Normalizer::normalize(&record, &stats()).inputs;

        assert_eq!(inputs.hours_studied, 0.5);
        assert_eq!(inputs.sleep_hours, 0.5);
        assert_eq!(inputs.attendance, 1.0);
        assert_eq!(inputs.previous_scores, 10.0);
        assert_eq!(inputs.physical_activity, 0.1);
        assert_eq!(inputs.tutoring_sessions, 0.0);
    }

    #[test]
    fn test_empty_reference_uses_last_resort_defaults() {
        let normalized = Normalizer::normalize(&RawStudentRecord::default(), &ReferenceStats::default());
        assert_eq!(normalized.inputs.sleep_hours, 7.0);
        assert_eq!(normalized.categorical["School_Type"], "Unknown");
    }
}
