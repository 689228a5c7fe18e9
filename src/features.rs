//! Feature derivation
//!
//! This module derives the engineered features from resolved inputs:
//! - Study/sleep/tutoring ratios
//! - Engagement and momentum products
//! - Burnout, fatigue and wellbeing composites
//!
//! Attendance is carried as a percentage; `a` below is the fraction
//! `attendance / 100` and `100 * a` the percentage. Every denominator carries
//! `EPSILON` or `+ 1`, and inputs are floor-clamped by the normalizer, so no
//! feature can divide by zero.

use crate::baseline::ReferenceStats;
use crate::error::{Result, ScholarError};
use crate::normalizer::Normalizer;
use crate::table::{Cell, FeatureRow, Table};
use crate::types::{
    EngineeredFeatures, NormalizedRecord, NumericField, RawStudentRecord, CATEGORICAL_FIELDS,
    EXAM_SCORE, FEATURE_NAMES,
};

/// Guard added to ratio denominators
pub const EPSILON: f64 = 1e-5;

/// Feature deriver for computing engineered features
pub struct FeatureDeriver;

impl FeatureDeriver {
    /// Derive features from a normalized record
    pub fn derive(normalized: &NormalizedRecord) -> EngineeredFeatures {
        let inputs = &normalized.inputs;
        let h = inputs.hours_studied;
        let s = inputs.sleep_hours;
        let a = inputs.attendance / 100.0;
        let t = inputs.tutoring_sessions;
        let p = inputs.previous_scores;
        let y = inputs.physical_activity;

        let overall_wellbeing_index = s + y;

        EngineeredFeatures {
            study_to_sleep_ratio: h / (s + EPSILON),
            tutoring_to_study_ratio: t / (h + EPSILON),
            study_per_score_unit: h / (p + EPSILON),
            engagement_index: a * h,
            academic_momentum: p * a,
            tutoring_impact: t * p,
            holistic_effort: h + 2.0 * t + y,
            burnout_risk: (h * 100.0 * a) / ((s * y) + 1.0),
            fatigue_factor: h.powi(2) / (s + EPSILON),
            score_gap_potential: 100.0 - p,
            log_hours_studied: h.ln_1p(),
            consistency_score: 100.0 * a / (h + EPSILON),
            rest_deficit: y / (s + EPSILON),
            academic_velocity: p / (h + EPSILON),
            effort_efficiency_index: (p * 100.0 * a) / ((h * s) + 1.0),
            distraction_vulnerability: h / (100.0 * a + EPSILON),
            resource_dependency_metric: t * (100.0 - p),
            overall_wellbeing_index,
            stress_load: h / (overall_wellbeing_index + EPSILON),
            study_sleep_harmonic: 2.0 * h * s / (h + s + EPSILON),
            study_density_factor: h.powi(2) * a,
            categorical: normalized.categorical.clone(),
        }
    }

    /// Normalize and derive in one step
    pub fn derive_record(record: &RawStudentRecord, stats: &ReferenceStats) -> EngineeredFeatures {
        Self::derive(&Normalizer::normalize(record, stats))
    }

    /// Engineered features of a record as a name-keyed row: the 21 numeric
    /// features, the resolved raw inputs, the categoricals, and the exam score
    /// when known.
    ///
    /// A record without any behavioral input keeps the engineered values it
    /// was supplied with.
    pub fn derive_row(record: &RawStudentRecord, stats: &ReferenceStats) -> FeatureRow {
        let normalized = Normalizer::normalize(record, stats);
        let features = Self::derive(&normalized);
        let keep_supplied = !record.has_raw_inputs();

        let mut row: FeatureRow = FEATURE_NAMES
            .iter()
            .zip(features.values())
            .map(|(name, value)| {
                let value = match record.engineered.get(*name) {
                    Some(supplied) if keep_supplied => *supplied,
                    _ => value,
                };
                (name.to_string(), Cell::Number(value))
            })
            .collect();

        let inputs = &normalized.inputs;
        for (field, value) in [
            (NumericField::HoursStudied, inputs.hours_studied),
            (NumericField::SleepHours, inputs.sleep_hours),
            (NumericField::Attendance, inputs.attendance),
            (NumericField::TutoringSessions, inputs.tutoring_sessions),
            (NumericField::PreviousScores, inputs.previous_scores),
            (NumericField::PhysicalActivity, inputs.physical_activity),
        ] {
            row.insert(field.column().to_string(), Cell::Number(value));
        }

        for (column, value) in &features.categorical {
            row.insert(column.clone(), Cell::Text(value.clone()));
        }
        if let Some(score) = record.exam_score {
            row.insert(EXAM_SCORE.to_string(), Cell::Number(score));
        }
        row
    }

    /// Derive an engineered table from raw records. Every record must carry an
    /// exam score, since the result is used as training data.
    pub fn derive_table(records: &[RawStudentRecord], stats: &ReferenceStats) -> Result<Table> {
        let mut table = Table::new(engineered_columns());
        for (i, record) in records.iter().enumerate() {
            if record.exam_score.is_none() {
                return Err(ScholarError::InvalidUpload(format!(
                    "row {}: missing {EXAM_SCORE}",
                    i + 1
                )));
            }
            table.push_row_map(&Self::derive_row(record, stats));
        }
        Ok(table)
    }
}

/// Column layout of an engineered training table
pub fn engineered_columns() -> Vec<String> {
    FEATURE_NAMES
        .iter()
        .chain(CATEGORICAL_FIELDS.iter())
        .chain(std::iter::once(&EXAM_SCORE))
        .map(|c| c.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResolvedInputs;
    use std::collections::BTreeMap;

    fn make_normalized(h: f64, s: f64, attendance: f64, t: f64, p: f64, y: f64) -> NormalizedRecord {
        NormalizedRecord {
            inputs: ResolvedInputs {
                hours_studied: h,
                sleep_hours: s,
                attendance,
                tutoring_sessions: t,
                previous_scores: p,
                physical_activity: y,
            },
            categorical: BTreeMap::from([("Gender".to_string(), "Male".to_string())]),
            imputed: vec![],
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6 * b.abs().max(1.0)
    }

    #[test]
    fn test_formulas() {
        let normalized = make_normalized(20.0, 8.0, 80.0, 2.0, 70.0, 4.0);
        let f = FeatureDeriver::derive(&normalized);

        assert!(close(f.study_to_sleep_ratio, 20.0 / (8.0 + EPSILON)));
        assert!(close(f.engagement_index, 16.0));
        assert!(close(f.academic_momentum, 56.0));
        assert!(close(f.tutoring_impact, 140.0));
        assert!(close(f.holistic_effort, 28.0));
        // (20 * 80) / (8 * 4 + 1)
        assert!(close(f.burnout_risk, 1600.0 / 33.0));
        assert!(close(f.fatigue_factor, 400.0 / (8.0 + EPSILON)));
        assert!(close(f.score_gap_potential, 30.0));
        assert!(close(f.log_hours_studied, 21.0_f64.ln()));
        assert!(close(f.consistency_score, 80.0 / (20.0 + EPSILON)));
        // (70 * 80) / (20 * 8 + 1)
        assert!(close(f.effort_efficiency_index, 5600.0 / 161.0));
        assert!(close(f.distraction_vulnerability, 20.0 / (80.0 + EPSILON)));
        assert!(close(f.resource_dependency_metric, 60.0));
        assert!(close(f.overall_wellbeing_index, 12.0));
        assert!(close(f.stress_load, 20.0 / (12.0 + EPSILON)));
        assert!(close(f.study_sleep_harmonic, 320.0 / (28.0 + EPSILON)));
        assert!(close(f.study_density_factor, 320.0));
        assert_eq!(f.categorical["Gender"], "Male");
    }

    #[test]
    fn test_derivation_is_deterministic_and_finite_at_floors() {
        // the normalizer's floors
        let normalized = make_normalized(0.5, 0.5, 1.0, 0.0, 10.0, 0.1);
        let first = FeatureDeriver::derive(&normalized);
        let second = FeatureDeriver::derive(&normalized);

        assert_eq!(first, second);
        assert!(first.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_feature_lookup_by_name() {
        let f = FeatureDeriver::derive(&make_normalized(10.0, 7.0, 50.0, 1.0, 60.0, 2.0));
        assert_eq!(f.get("Engagement_Index"), Some(f.engagement_index));
        assert_eq!(f.get("Not_A_Feature"), None);
    }

    #[test]
    fn test_derive_table_requires_exam_score() {
        let stats = ReferenceStats::default();
        let records = vec![RawStudentRecord {
            hours_studied: Some(10.0),
            ..Default::default()
        }];
        assert!(matches!(
            FeatureDeriver::derive_table(&records, &stats),
            Err(ScholarError::InvalidUpload(_))
        ));
    }

    #[test]
    fn test_supplied_features_kept_without_raw_inputs() {
        let stats = ReferenceStats::default();
        let mut record = RawStudentRecord::default();
        record.engineered.insert("Burnout_Risk".to_string(), 123.0);

        let row = FeatureDeriver::derive_row(&record, &stats);
        assert_eq!(row["Burnout_Risk"], Cell::Number(123.0));

        record.hours_studied = Some(10.0);
        let row = FeatureDeriver::derive_row(&record, &stats);
        assert_ne!(row["Burnout_Risk"], Cell::Number(123.0));
        assert_eq!(row["Hours_Studied"], Cell::Number(10.0));
    }

    #[test]
    fn test_derive_table_layout() {
        let stats = ReferenceStats::default();
        let records = vec![RawStudentRecord {
            hours_studied: Some(10.0),
            exam_score: Some(66.0),
            ..Default::default()
        }];
        let table = FeatureDeriver::derive_table(&records, &stats).unwrap();
        assert_eq!(table.columns().len(), 21 + 13 + 1);
        assert_eq!(table.cell(0, EXAM_SCORE), Some(&Cell::Number(66.0)));
        assert_eq!(table.cell(0, "Gender"), Some(&Cell::from("Unknown")));
    }
}
