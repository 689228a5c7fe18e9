//! Core types for the Scholar Flux pipelines
//!
//! This module defines the data structures that flow through each stage:
//! canonical raw records, resolved inputs, engineered features, persona labels
//! and the result payloads returned to callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Regression target column
pub const EXAM_SCORE: &str = "Exam_Score";
/// Persona label column of the clustering table
pub const PERSONA_COLUMN: &str = "Persona_Cluster";
/// Class section column used by cohort filters
pub const CLASS_SECTION: &str = "Class_Section";

/// Raw numeric attributes, by canonical column name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericField {
    HoursStudied,
    SleepHours,
    Attendance,
    TutoringSessions,
    PreviousScores,
    PhysicalActivity,
    ExamScore,
}

impl NumericField {
    pub const ALL: [NumericField; 7] = [
        NumericField::HoursStudied,
        NumericField::SleepHours,
        NumericField::Attendance,
        NumericField::TutoringSessions,
        NumericField::PreviousScores,
        NumericField::PhysicalActivity,
        NumericField::ExamScore,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            NumericField::HoursStudied => "Hours_Studied",
            NumericField::SleepHours => "Sleep_Hours",
            NumericField::Attendance => "Attendance",
            NumericField::TutoringSessions => "Tutoring_Sessions",
            NumericField::PreviousScores => "Previous_Scores",
            NumericField::PhysicalActivity => "Physical_Activity",
            NumericField::ExamScore => EXAM_SCORE,
        }
    }
}

/// Categorical attributes passed through feature derivation unchanged
pub const CATEGORICAL_FIELDS: [&str; 13] = [
    "Parental_Involvement",
    "Access_to_Resources",
    "Extracurricular_Activities",
    "Motivation_Level",
    "Internet_Access",
    "Family_Income",
    "Teacher_Quality",
    "School_Type",
    "Peer_Influence",
    "Learning_Disabilities",
    "Parental_Education_Level",
    "Distance_from_Home",
    "Gender",
];

/// Canonical student record produced at the ingestion boundary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStudentRecord {
    /// Weekly hours studied
    pub hours_studied: Option<f64>,
    /// Nightly sleep hours
    pub sleep_hours: Option<f64>,
    /// Attendance percentage (0-100)
    pub attendance: Option<f64>,
    /// Tutoring sessions per month
    pub tutoring_sessions: Option<f64>,
    /// Previous score (0-100)
    pub previous_scores: Option<f64>,
    /// Weekly hours of physical activity
    pub physical_activity: Option<f64>,
    /// Observed exam score, when known (training rows)
    pub exam_score: Option<f64>,
    /// Categorical attributes keyed by canonical column name
    pub categorical: BTreeMap<String, String>,
    /// Already-engineered numeric columns supplied by the caller
    pub engineered: BTreeMap<String, f64>,
}

impl RawStudentRecord {
    pub fn numeric(&self, field: NumericField) -> Option<f64> {
        match field {
            NumericField::HoursStudied => self.hours_studied,
            NumericField::SleepHours => self.sleep_hours,
            NumericField::Attendance => self.attendance,
            NumericField::TutoringSessions => self.tutoring_sessions,
            NumericField::PreviousScores => self.previous_scores,
            NumericField::PhysicalActivity => self.physical_activity,
            NumericField::ExamScore => self.exam_score,
        }
    }

    pub fn set_numeric(&mut self, field: NumericField, value: Option<f64>) {
        let slot = match field {
            NumericField::HoursStudied => &mut self.hours_studied,
            NumericField::SleepHours => &mut self.sleep_hours,
            NumericField::Attendance => &mut self.attendance,
            NumericField::TutoringSessions => &mut self.tutoring_sessions,
            NumericField::PreviousScores => &mut self.previous_scores,
            NumericField::PhysicalActivity => &mut self.physical_activity,
            NumericField::ExamScore => &mut self.exam_score,
        };
        *slot = value;
    }

    /// True when any behavioral input (everything but the scores) is present
    pub fn has_raw_inputs(&self) -> bool {
        [
            NumericField::HoursStudied,
            NumericField::SleepHours,
            NumericField::Attendance,
            NumericField::TutoringSessions,
            NumericField::PhysicalActivity,
        ]
        .iter()
        .any(|field| self.numeric(*field).is_some())
    }

    /// Overlay every present field of `changes` onto a copy of this record
    pub fn merged_with(&self, changes: &RawStudentRecord) -> RawStudentRecord {
        let mut merged = self.clone();
        for field in NumericField::ALL {
            if let Some(value) = changes.numeric(field) {
                merged.set_numeric(field, Some(value));
            }
        }
        for (key, value) in &changes.categorical {
            merged.categorical.insert(key.clone(), value.clone());
        }
        for (key, value) in &changes.engineered {
            merged.engineered.insert(key.clone(), *value);
        }
        merged
    }
}

/// Numeric inputs after fallback resolution and clamping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedInputs {
    pub hours_studied: f64,
    pub sleep_hours: f64,
    /// Attendance percentage (0-100)
    pub attendance: f64,
    pub tutoring_sessions: f64,
    pub previous_scores: f64,
    pub physical_activity: f64,
}

/// Resolved numeric inputs plus categorical attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub inputs: ResolvedInputs,
    pub categorical: BTreeMap<String, String>,
    /// Fields that were filled from reference medians/modes
    pub imputed: Vec<String>,
}

/// The 21 engineered numeric features, in schema order
pub const FEATURE_NAMES: [&str; 21] = [
    "Study_to_Sleep_Ratio",
    "Tutoring_to_Study_Ratio",
    "Study_Per_Score_Unit",
    "Engagement_Index",
    "Academic_Momentum",
    "Tutoring_Impact",
    "Holistic_Effort",
    "Burnout_Risk",
    "Fatigue_Factor",
    "Score_Gap_Potential",
    "Log_Hours_Studied",
    "Consistency_Score",
    "Rest_Deficit",
    "Academic_Velocity",
    "Effort_Efficiency_Index",
    "Distraction_Vulnerability",
    "Resource_Dependency_Metric",
    "Overall_Wellbeing_Index",
    "Stress_Load",
    "Study_Sleep_Harmonic",
    "Study_Density_Factor",
];

/// Engineered feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineeredFeatures {
    pub study_to_sleep_ratio: f64,
    pub tutoring_to_study_ratio: f64,
    pub study_per_score_unit: f64,
    pub engagement_index: f64,
    pub academic_momentum: f64,
    pub tutoring_impact: f64,
    pub holistic_effort: f64,
    pub burnout_risk: f64,
    pub fatigue_factor: f64,
    pub score_gap_potential: f64,
    pub log_hours_studied: f64,
    pub consistency_score: f64,
    pub rest_deficit: f64,
    pub academic_velocity: f64,
    pub effort_efficiency_index: f64,
    pub distraction_vulnerability: f64,
    pub resource_dependency_metric: f64,
    pub overall_wellbeing_index: f64,
    pub stress_load: f64,
    pub study_sleep_harmonic: f64,
    pub study_density_factor: f64,
    /// Categorical attributes carried through unchanged
    pub categorical: BTreeMap<String, String>,
}

impl EngineeredFeatures {
    /// Numeric values in `FEATURE_NAMES` order
    pub fn values(&self) -> [f64; 21] {
        [
            self.study_to_sleep_ratio,
            self.tutoring_to_study_ratio,
            self.study_per_score_unit,
            self.engagement_index,
            self.academic_momentum,
            self.tutoring_impact,
            self.holistic_effort,
            self.burnout_risk,
            self.fatigue_factor,
            self.score_gap_potential,
            self.log_hours_studied,
            self.consistency_score,
            self.rest_deficit,
            self.academic_velocity,
            self.effort_efficiency_index,
            self.distraction_vulnerability,
            self.resource_dependency_metric,
            self.overall_wellbeing_index,
            self.stress_load,
            self.study_sleep_harmonic,
            self.study_density_factor,
        ]
    }

    /// Lookup a numeric feature by column name
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.values()[i])
    }
}

/// One of the four fixed behavioral personas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PersonaLabel {
    #[serde(rename = "The Overworked Achiever")]
    OverworkedAchiever,
    #[serde(rename = "The Disengaged Learner")]
    DisengagedLearner,
    #[serde(rename = "The Balanced Achiever")]
    BalancedAchiever,
    #[serde(rename = "The Developing Learner")]
    DevelopingLearner,
}

impl PersonaLabel {
    pub const ALL: [PersonaLabel; 4] = [
        PersonaLabel::OverworkedAchiever,
        PersonaLabel::DisengagedLearner,
        PersonaLabel::BalancedAchiever,
        PersonaLabel::DevelopingLearner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaLabel::OverworkedAchiever => "The Overworked Achiever",
            PersonaLabel::DisengagedLearner => "The Disengaged Learner",
            PersonaLabel::BalancedAchiever => "The Balanced Achiever",
            PersonaLabel::DevelopingLearner => "The Developing Learner",
        }
    }

    /// Personas counted as unfavorable outcomes (at-risk lists, fairness)
    pub fn is_at_risk(&self) -> bool {
        matches!(
            self,
            PersonaLabel::OverworkedAchiever | PersonaLabel::DisengagedLearner
        )
    }

    /// Teaching recommendation shown next to the persona
    pub fn recommendation(&self) -> &'static str {
        match self {
            PersonaLabel::DisengagedLearner => {
                "Focus on 'micro-wins' to build academic momentum."
            }
            PersonaLabel::DevelopingLearner => {
                "Introduce active recall and foundational tutoring."
            }
            PersonaLabel::OverworkedAchiever => {
                "DO NOT assign extra homework. Mandate recovery time."
            }
            PersonaLabel::BalancedAchiever => "Provide advanced, open-ended project work.",
        }
    }
}

impl fmt::Display for PersonaLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonaLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PersonaLabel::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| format!("unknown persona '{s}'"))
    }
}

/// Named coefficient from the fitted regression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub name: String,
    pub importance: f64,
}

/// Score and persona for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub predicted_score: f64,
    pub predicted_persona: PersonaLabel,
}

/// Difference between a baseline record and a modified copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfOutcome {
    pub original: f64,
    pub new: f64,
    pub difference: f64,
    pub original_persona: PersonaLabel,
    pub new_persona: PersonaLabel,
    pub persona_changed: bool,
}

/// Result of a CSV upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub success: bool,
    pub new_students_uploaded: usize,
    pub total_students_now: usize,
}

/// Round to a fixed number of decimals
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_serde_uses_display_names() {
        let json = serde_json::to_string(&PersonaLabel::BalancedAchiever).unwrap();
        assert_eq!(json, "\"The Balanced Achiever\"");

        let parsed: PersonaLabel = serde_json::from_str("\"The Disengaged Learner\"").unwrap();
        assert_eq!(parsed, PersonaLabel::DisengagedLearner);
    }

    #[test]
    fn test_persona_from_str() {
        assert_eq!(
            "The Overworked Achiever".parse::<PersonaLabel>(),
            Ok(PersonaLabel::OverworkedAchiever)
        );
        assert!("The Lost Learner".parse::<PersonaLabel>().is_err());
    }

    #[test]
    fn test_merged_with_overrides_present_fields_only() {
        let base = RawStudentRecord {
            attendance: Some(60.0),
            hours_studied: Some(4.0),
            ..Default::default()
        };
        let changes = RawStudentRecord {
            attendance: Some(90.0),
            ..Default::default()
        };
        let merged = base.merged_with(&changes);
        assert_eq!(merged.attendance, Some(90.0));
        assert_eq!(merged.hours_studied, Some(4.0));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(71.26, 1), 71.3);
        assert_eq!(round_to(-0.12345, 3), -0.123);
    }
}
