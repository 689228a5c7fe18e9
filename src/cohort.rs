//! Cohort queries
//!
//! Read-only views over the persona-labeled clustering table, optionally
//! joined by row index with the raw student table:
//! - persona summary with recommendations
//! - early warnings for at-risk personas
//! - student list, per-student detail and synthetic timeline
//! - summary report and fairness audit
//!
//! Every query takes an optional class filter. Rows without a
//! `Class_Section` column are assigned "10-A", "10-B", "10-C" by row index.

use crate::table::{Cell, Table};
use crate::types::{round_to, PersonaLabel, CLASS_SECTION, EXAM_SCORE, PERSONA_COLUMN};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Synthesized class sections, assigned by row index
pub const CLASS_SECTIONS: [&str; 3] = ["10-A", "10-B", "10-C"];

/// Maximum number of early warnings returned
pub const AT_RISK_LIMIT: usize = 30;

/// Points of a synthetic timeline
pub const TIMELINE_LABELS: [&str; 5] = ["Baseline", "Week 1", "Week 2", "Week 3", "Projection"];

/// Disparate impact outside this band is flagged
const FAIR_RATIO_MIN: f64 = 0.8;
const FAIR_RATIO_MAX: f64 = 1.25;

/// Persona count, mean score and recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub id: String,
    pub name: String,
    pub count: usize,
    pub avg_score: f64,
    pub recommendation: String,
}

/// At-risk student entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyWarning {
    pub index: usize,
    pub score: Option<i64>,
    pub cluster_name: String,
    pub issues: Vec<String>,
}

/// One row of the student list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentOverview {
    pub index: usize,
    pub exam_score: Option<i64>,
    pub cluster_name: String,
    pub engagement: Option<f64>,
    pub burnout_risk: Option<f64>,
    pub motivation: String,
    pub attendance: Option<f64>,
    pub study_hours: Option<f64>,
    pub tutoring_sessions: Option<f64>,
}

/// Every column of one student, plus raw inputs from the joined table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetail {
    pub index: usize,
    pub cluster_name: String,
    pub hours_studied: Option<f64>,
    pub attendance: Option<f64>,
    pub tutoring_sessions: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub physical_activity: Option<f64>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Cell>,
}

impl StudentDetail {
    pub fn number(&self, column: &str) -> Option<f64> {
        self.fields.get(column).and_then(Cell::as_f64)
    }
}

/// Cohort-level aggregates. Raw aggregates are `None` when the raw table or
/// the column is unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    pub total_students: usize,
    pub avg_exam_score: Option<f64>,
    pub high_risk_percent: f64,
    /// Share of each persona, 3 decimals
    pub cluster_distribution: BTreeMap<String, f64>,
    pub avg_attendance: Option<f64>,
    pub avg_study_hours: Option<f64>,
    pub avg_sleep: Option<f64>,
    pub avg_physical_activity: Option<f64>,
    /// Percent of students with at least one tutoring session
    pub tutoring_rate: Option<f64>,
    /// Percent of students with a learning disability
    pub disability_rate: Option<f64>,
}

/// Synthetic trend for one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub labels: Vec<String>,
    pub burnout_trend: Vec<f64>,
    pub scores: Vec<f64>,
    pub sleep: Vec<f64>,
}

/// Outcome of a disparate impact check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FairnessFlag {
    #[serde(rename = "Acceptable")]
    Acceptable,
    #[serde(rename = "Potential bias")]
    PotentialBias,
    #[serde(rename = "Insufficient data")]
    InsufficientData,
    #[serde(rename = "Missing column")]
    MissingColumn,
}

/// Disparate impact of at-risk persona assignment between two groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisparateImpact {
    /// Unprivileged / privileged at-risk rate, 2 decimals. `None` when the
    /// privileged rate is zero.
    pub ratio: Option<f64>,
    pub flag: FairnessFlag,
}

/// Fairness audit over gender and family income
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessReport {
    pub gender: DisparateImpact,
    pub income: DisparateImpact,
}

/// True when a class filter selects the whole school
pub fn is_whole_school(class: Option<&str>) -> bool {
    match class.map(str::trim) {
        None => true,
        Some(name) => {
            name.is_empty()
                || name.eq_ignore_ascii_case("school")
                || name.eq_ignore_ascii_case("all classes")
        }
    }
}

/// Class section of a row: the table's own column, or the synthesized one
pub fn class_section(table: &Table, row: usize) -> String {
    match table.cell(row, CLASS_SECTION) {
        Some(cell) if !cell.is_missing() => cell.to_field(),
        _ => CLASS_SECTIONS[row % CLASS_SECTIONS.len()].to_string(),
    }
}

/// Read-only cohort view over a labeled table and optional raw table
#[derive(Debug, Clone, Copy)]
pub struct CohortView<'a> {
    labeled: &'a Table,
    raw: Option<&'a Table>,
    class: Option<&'a str>,
}

impl<'a> CohortView<'a> {
    pub fn new(labeled: &'a Table, raw: Option<&'a Table>) -> Self {
        Self {
            labeled,
            raw,
            class: None,
        }
    }

    /// Restrict queries to one class section
    pub fn for_class(mut self, class: Option<&'a str>) -> Self {
        self.class = class.filter(|c| !is_whole_school(Some(*c)));
        self
    }

    fn selected(&self, table: &Table) -> Vec<usize> {
        (0..table.len())
            .filter(|&i| match self.class {
                None => true,
                Some(class) => class_section(table, i) == class,
            })
            .collect()
    }

    fn rows(&self) -> Vec<usize> {
        self.selected(self.labeled)
    }

    fn persona(&self, row: usize) -> Option<PersonaLabel> {
        self.labeled
            .cell(row, PERSONA_COLUMN)
            .and_then(Cell::as_text)
            .and_then(|text| text.parse().ok())
    }

    fn number(&self, row: usize, column: &str) -> Option<f64> {
        self.labeled.cell(row, column).and_then(Cell::as_f64)
    }

    /// Raw value by row index, falling back to the labeled table's column
    fn raw_number(&self, row: usize, column: &str) -> Option<f64> {
        self.raw
            .and_then(|raw| raw.cell(row, column))
            .and_then(Cell::as_f64)
            .or_else(|| self.number(row, column))
    }

    /// Count, mean score and recommendation per persona, largest first
    pub fn cluster_summary(&self) -> Vec<ClusterSummary> {
        let mut groups: BTreeMap<PersonaLabel, (usize, Vec<f64>)> = BTreeMap::new();
        for row in self.rows() {
            if let Some(persona) = self.persona(row) {
                let entry = groups.entry(persona).or_default();
                entry.0 += 1;
                entry.1.extend(self.number(row, EXAM_SCORE));
            }
        }

        let mut summary: Vec<ClusterSummary> = groups
            .into_iter()
            .map(|(persona, (count, scores))| ClusterSummary {
                id: persona.as_str().to_string(),
                name: persona.as_str().to_string(),
                count,
                avg_score: mean(&scores).map_or(0.0, |m| round_to(m, 1)),
                recommendation: persona.recommendation().to_string(),
            })
            .collect();
        summary.sort_by(|a, b| b.count.cmp(&a.count));
        summary
    }

    /// First rows labeled with an at-risk persona
    pub fn at_risk(&self) -> Vec<EarlyWarning> {
        self.rows()
            .into_iter()
            .filter_map(|row| {
                let persona = self.persona(row).filter(PersonaLabel::is_at_risk)?;
                let issue = match persona {
                    PersonaLabel::DisengagedLearner => "Critically low engagement",
                    _ => "Severe burnout risk",
                };
                Some(EarlyWarning {
                    index: row,
                    score: self.number(row, EXAM_SCORE).map(|s| s as i64),
                    cluster_name: persona.as_str().to_string(),
                    issues: vec![issue.to_string()],
                })
            })
            .take(AT_RISK_LIMIT)
            .collect()
    }

    /// Overview of every selected student
    pub fn students(&self) -> Vec<StudentOverview> {
        self.rows()
            .into_iter()
            .map(|row| StudentOverview {
                index: row,
                exam_score: self.number(row, EXAM_SCORE).map(|s| s as i64),
                cluster_name: self.text_or_unknown(row, PERSONA_COLUMN),
                engagement: self.number(row, "Engagement_Index").map(|v| round_to(v, 1)),
                burnout_risk: self.number(row, "Burnout_Risk").map(|v| round_to(v, 1)),
                motivation: self.text_or_unknown(row, "Motivation_Level"),
                attendance: self.raw_number(row, "Attendance"),
                study_hours: self.raw_number(row, "Hours_Studied"),
                tutoring_sessions: self.raw_number(row, "Tutoring_Sessions"),
            })
            .collect()
    }

    fn text_or_unknown(&self, row: usize, column: &str) -> String {
        match self.labeled.cell(row, column) {
            Some(cell) if !cell.is_missing() => cell.to_field(),
            _ => "Unknown".to_string(),
        }
    }

    /// Full record of one student by table index, ignoring the class filter
    pub fn student(&self, index: usize) -> Option<StudentDetail> {
        let mut fields = self.labeled.row_map(index)?;
        let cluster_name = match fields.remove(PERSONA_COLUMN) {
            Some(cell) if !cell.is_missing() => cell.to_field(),
            _ => "Unknown".to_string(),
        };
        Some(StudentDetail {
            index,
            cluster_name,
            hours_studied: self.raw_number(index, "Hours_Studied"),
            attendance: self.raw_number(index, "Attendance"),
            tutoring_sessions: self.raw_number(index, "Tutoring_Sessions"),
            sleep_hours: self.raw_number(index, "Sleep_Hours"),
            physical_activity: self.raw_number(index, "Physical_Activity"),
            fields,
        })
    }

    /// Synthetic timeline for one student; `seed` makes it reproducible
    pub fn timeline(&self, index: usize, seed: u64) -> Option<Timeline> {
        let detail = self.student(index)?;
        Some(synthetic_timeline(
            detail.number("Burnout_Risk"),
            detail.number(EXAM_SCORE),
            detail.sleep_hours,
            seed.wrapping_add(index as u64),
        ))
    }

    /// Totals, persona shares and raw aggregates
    pub fn summary_report(&self) -> SummaryReport {
        let rows = self.rows();
        let total = rows.len();
        let raw_rows = self.raw.map(|raw| (raw, self.selected(raw)));

        let raw_mean = |column: &str| -> Option<f64> {
            let (raw, selected) = raw_rows.as_ref()?;
            let values: Vec<f64> = selected
                .iter()
                .filter_map(|&i| raw.cell(i, column).and_then(Cell::as_f64))
                .collect();
            mean(&values).map(|m| round_to(m, 1))
        };
        let raw_rate = |column: &str, hit: &dyn Fn(&Cell) -> bool| -> Option<f64> {
            let (raw, selected) = raw_rows.as_ref()?;
            if !raw.has_column(column) || selected.is_empty() {
                return None;
            }
            let hits = selected
                .iter()
                .filter(|&&i| raw.cell(i, column).map_or(false, hit))
                .count();
            Some(round_to(100.0 * hits as f64 / selected.len() as f64, 1))
        };

        if total == 0 {
            return SummaryReport {
                total_students: 0,
                avg_exam_score: None,
                high_risk_percent: 0.0,
                cluster_distribution: BTreeMap::new(),
                avg_attendance: None,
                avg_study_hours: None,
                avg_sleep: None,
                avg_physical_activity: None,
                tutoring_rate: None,
                disability_rate: None,
            };
        }

        let personas: Vec<Option<PersonaLabel>> = rows.iter().map(|&r| self.persona(r)).collect();
        let high_risk = personas.iter().flatten().filter(|p| p.is_at_risk()).count();

        let labeled_count = personas.iter().flatten().count();
        let mut cluster_distribution = BTreeMap::new();
        for persona in personas.iter().flatten() {
            *cluster_distribution
                .entry(persona.as_str().to_string())
                .or_insert(0.0) += 1.0;
        }
        for share in cluster_distribution.values_mut() {
            *share = round_to(*share / labeled_count as f64, 3);
        }

        let scores: Vec<f64> = rows
            .iter()
            .filter_map(|&r| self.number(r, EXAM_SCORE))
            .collect();

        SummaryReport {
            total_students: total,
            avg_exam_score: mean(&scores).map(|m| round_to(m, 1)),
            high_risk_percent: round_to(100.0 * high_risk as f64 / total as f64, 1),
            cluster_distribution,
            avg_attendance: raw_mean("Attendance"),
            avg_study_hours: raw_mean("Hours_Studied"),
            avg_sleep: raw_mean("Sleep_Hours"),
            avg_physical_activity: raw_mean("Physical_Activity"),
            tutoring_rate: raw_rate("Tutoring_Sessions", &|c| c.as_f64().map_or(false, |v| v > 0.0)),
            disability_rate: raw_rate("Learning_Disabilities", &|c| c.as_text() == Some("Yes")),
        }
    }

    /// Disparate impact of at-risk labels between two values of `attribute`
    pub fn disparate_impact(
        &self,
        attribute: &str,
        unprivileged: &str,
        privileged: &str,
    ) -> DisparateImpact {
        if !self.labeled.has_column(attribute) {
            return DisparateImpact {
                ratio: Some(1.0),
                flag: FairnessFlag::MissingColumn,
            };
        }

        let rate = |group: &str| -> Option<f64> {
            let members: Vec<usize> = self
                .rows()
                .into_iter()
                .filter(|&r| {
                    self.labeled
                        .cell(r, attribute)
                        .map_or(false, |c| c.to_field() == group)
                })
                .collect();
            if members.is_empty() {
                return None;
            }
            let at_risk = members
                .iter()
                .filter(|&&r| self.persona(r).map_or(false, |p| p.is_at_risk()))
                .count();
            Some(at_risk as f64 / members.len() as f64)
        };

        let (Some(unprivileged_rate), Some(privileged_rate)) = (rate(unprivileged), rate(privileged))
        else {
            return DisparateImpact {
                ratio: Some(1.0),
                flag: FairnessFlag::InsufficientData,
            };
        };

        if privileged_rate == 0.0 {
            let flag = if unprivileged_rate > 0.0 {
                FairnessFlag::PotentialBias
            } else {
                FairnessFlag::Acceptable
            };
            return DisparateImpact { ratio: None, flag };
        }

        let ratio = unprivileged_rate / privileged_rate;
        let flag = if (FAIR_RATIO_MIN..=FAIR_RATIO_MAX).contains(&ratio) {
            FairnessFlag::Acceptable
        } else {
            FairnessFlag::PotentialBias
        };
        // only the reported ratio is rounded
        DisparateImpact {
            ratio: Some(round_to(ratio, 2)),
            flag,
        }
    }

    /// Gender (Female vs Male) and family income (Low vs High) audit
    pub fn fairness(&self) -> FairnessReport {
        FairnessReport {
            gender: self.disparate_impact("Gender", "Female", "Male"),
            income: self.disparate_impact("Family_Income", "Low", "High"),
        }
    }
}

/// Baseline plus four normally perturbed points for burnout, score and sleep.
/// Absent baselines default to burnout 50, score 70 and sleep 7.
pub fn synthetic_timeline(
    burnout: Option<f64>,
    score: Option<f64>,
    sleep: Option<f64>,
    seed: u64,
) -> Timeline {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut series = |base: f64, std: f64| -> Vec<f64> {
        let mut values = vec![base];
        values.extend((1..TIMELINE_LABELS.len()).map(|_| sample_normal(&mut rng, base, std)));
        values
    };

    let burnout_trend = series(burnout.unwrap_or(50.0), 5.0)
        .into_iter()
        .map(|v| round_to(v, 1))
        .collect();
    let scores = series(score.unwrap_or(70.0), 2.0)
        .into_iter()
        .map(|v| v.round())
        .collect();
    let sleep = series(sleep.unwrap_or(7.0), 0.5)
        .into_iter()
        .map(|v| round_to(v.clamp(0.0, 24.0), 1))
        .collect();

    Timeline {
        labels: TIMELINE_LABELS.iter().map(|l| l.to_string()).collect(),
        burnout_trend,
        scores,
        sleep,
    }
}

/// Box-Muller draw from N(mean, std)
fn sample_normal(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(1e-10..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std * z
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OVER: &str = "The Overworked Achiever";
    const DIS: &str = "The Disengaged Learner";
    const BAL: &str = "The Balanced Achiever";
    const DEV: &str = "The Developing Learner";

    fn labeled() -> Table {
        Table::from_reader(
            format!(
                "Exam_Score,Burnout_Risk,Engagement_Index,Gender,Family_Income,Motivation_Level,Persona_Cluster\n\
                 70,90.56,14.2,Female,Low,High,{OVER}\n\
                 60,10,2.04,Male,High,Low,{DIS}\n\
                 88,20,12,Female,Low,High,{BAL}\n\
                 58,22,11,Male,High,Medium,{DEV}\n\
                 72,95,15,Male,Low,High,{OVER}\n\
                 90,18,12.5,Female,High,,{BAL}\n"
            )
            .as_bytes(),
        )
        .unwrap()
    }

    fn raw() -> Table {
        Table::from_reader(
            "Hours_Studied,Attendance,Sleep_Hours,Physical_Activity,Tutoring_Sessions,Learning_Disabilities\n\
             30,90,5,1,0,No\n\
             5,60,8,3,2,Yes\n\
             20,95,7,3,1,No\n\
             18,70,7,2,0,No\n\
             32,92,5,1,3,No\n\
             21,97,8,4,0,Yes\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_whole_school_filters() {
        assert!(is_whole_school(None));
        assert!(is_whole_school(Some("")));
        assert!(is_whole_school(Some("School")));
        assert!(is_whole_school(Some("all classes")));
        assert!(!is_whole_school(Some("10-B")));
    }

    #[test]
    fn test_synthesized_sections() {
        let table = labeled();
        assert_eq!(class_section(&table, 0), "10-A");
        assert_eq!(class_section(&table, 4), "10-B");
        assert_eq!(class_section(&table, 5), "10-C");
    }

    #[test]
    fn test_cluster_summary() {
        let table = labeled();
        let summary = CohortView::new(&table, None).cluster_summary();

        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0].count, 2);
        let balanced = summary.iter().find(|s| s.name == BAL).unwrap();
        assert_eq!(balanced.avg_score, 89.0);
        assert_eq!(
            balanced.recommendation,
            "Provide advanced, open-ended project work."
        );
    }

    #[test]
    fn test_class_filter() {
        let table = labeled();
        // rows 0 and 3 are in 10-A
        let view = CohortView::new(&table, None).for_class(Some("10-A"));
        let students = view.students();
        assert_eq!(
            students.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 3]
        );
        let all = CohortView::new(&table, None).for_class(Some("school"));
        assert_eq!(all.students().len(), 6);
    }

    #[test]
    fn test_at_risk_issues() {
        let table = labeled();
        let warnings = CohortView::new(&table, None).at_risk();
        assert_eq!(
            warnings.iter().map(|w| w.index).collect::<Vec<_>>(),
            vec![0, 1, 4]
        );
        assert_eq!(warnings[0].issues, vec!["Severe burnout risk".to_string()]);
        assert_eq!(warnings[1].issues, vec!["Critically low engagement".to_string()]);
        assert_eq!(warnings[1].score, Some(60));
    }

    #[test]
    fn test_students_join_raw_table() {
        let table = labeled();
        let raw = raw();
        let students = CohortView::new(&table, Some(&raw)).students();
        assert_eq!(students[1].attendance, Some(60.0));
        assert_eq!(students[0].burnout_risk, Some(90.6));
        assert_eq!(students[5].motivation, "Unknown");

        let without_raw = CohortView::new(&table, None).students();
        assert_eq!(without_raw[1].attendance, None);
    }

    #[test]
    fn test_student_detail() {
        let table = labeled();
        let raw = raw();
        let view = CohortView::new(&table, Some(&raw));
        let detail = view.student(2).unwrap();
        assert_eq!(detail.cluster_name, BAL);
        assert_eq!(detail.sleep_hours, Some(7.0));
        assert!(!detail.fields.contains_key(PERSONA_COLUMN));
        assert!(view.student(99).is_none());
    }

    #[test]
    fn test_summary_report() {
        let table = labeled();
        let raw = raw();
        let report = CohortView::new(&table, Some(&raw)).summary_report();

        assert_eq!(report.total_students, 6);
        assert_eq!(report.avg_exam_score, Some(73.0));
        assert_eq!(report.high_risk_percent, 50.0);
        assert_eq!(report.cluster_distribution[OVER], 0.333);
        assert_eq!(report.avg_sleep, Some(6.7));
        assert_eq!(report.tutoring_rate, Some(50.0));
        assert_eq!(report.disability_rate, Some(33.3));
    }

    #[test]
    fn test_summary_report_without_raw() {
        let table = labeled();
        let report = CohortView::new(&table, None).summary_report();
        assert_eq!(report.avg_attendance, None);
        assert_eq!(report.tutoring_rate, None);

        let empty = CohortView::new(&table, None)
            .for_class(Some("12-Z"))
            .summary_report();
        assert_eq!(empty.total_students, 0);
        assert_eq!(empty.avg_exam_score, None);
    }

    #[test]
    fn test_timeline_is_seeded_and_bounded() {
        let first = synthetic_timeline(Some(40.0), Some(75.0), Some(23.9), 7);
        let second = synthetic_timeline(Some(40.0), Some(75.0), Some(23.9), 7);
        assert_eq!(first, second);
        assert_eq!(first.labels.len(), 5);
        assert_eq!(first.burnout_trend[0], 40.0);
        assert_eq!(first.scores[0], 75.0);
        assert!(first.sleep.iter().all(|s| (0.0..=24.0).contains(s)));
        assert!(first.scores.iter().all(|s| s.fract() == 0.0));
    }

    #[test]
    fn test_fairness() {
        let table = labeled();
        let report = CohortView::new(&table, None).fairness();

        // Female: 1 of 3 at risk, Male: 2 of 3 at risk
        assert_eq!(report.gender.ratio, Some(0.5));
        assert_eq!(report.gender.flag, FairnessFlag::PotentialBias);
        // Low: 2 of 3, High: 1 of 3
        assert_eq!(report.income.ratio, Some(2.0));

        let no_gender = table.drop_columns(&["Gender"]);
        let missing = CohortView::new(&no_gender, None).fairness();
        assert_eq!(missing.gender.flag, FairnessFlag::MissingColumn);

        let one_class = CohortView::new(&table, None).for_class(Some("10-C"));
        // 10-C holds rows 2 and 5, both Female
        assert_eq!(one_class.fairness().gender.flag, FairnessFlag::InsufficientData);
    }

    #[test]
    fn test_fairness_zero_privileged_rate() {
        let table = Table::from_reader(
            format!("Gender,Persona_Cluster\nFemale,{DIS}\nMale,{BAL}\n").as_bytes(),
        )
        .unwrap();
        let impact = CohortView::new(&table, None).disparate_impact("Gender", "Female", "Male");
        assert_eq!(impact.ratio, None);
        assert_eq!(impact.flag, FairnessFlag::PotentialBias);
    }

    /// Gender table with the given at-risk and total counts per group
    fn gender_table(female: (usize, usize), male: (usize, usize)) -> Table {
        let mut csv = String::from("Gender,Persona_Cluster\n");
        for (gender, (at_risk, total)) in [("Female", female), ("Male", male)] {
            for i in 0..total {
                let persona = if i < at_risk { DIS } else { BAL };
                csv.push_str(&format!("{gender},{persona}\n"));
            }
        }
        Table::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_fairness_flag_uses_unrounded_ratio() {
        // 7/11 against 4/5 is 0.795..., reported as 0.8 but outside the band
        let table = gender_table((7, 11), (4, 5));
        let impact = CohortView::new(&table, None).disparate_impact("Gender", "Female", "Male");
        assert_eq!(impact.ratio, Some(0.8));
        assert_eq!(impact.flag, FairnessFlag::PotentialBias);
    }

    #[test]
    fn test_fairness_equal_rates_are_acceptable() {
        let table = gender_table((3, 6), (2, 4));
        let impact = CohortView::new(&table, None).disparate_impact("Gender", "Female", "Male");
        assert_eq!(impact.ratio, Some(1.0));
        assert_eq!(impact.flag, FairnessFlag::Acceptable);
    }
}
