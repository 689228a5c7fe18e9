//! Narrative prompts
//!
//! Formats student and cohort snapshots into plain-text prompts for an
//! external text generator, and runs that generator on a worker thread with a
//! deadline. The generator itself lives outside this crate behind the
//! `TextGenerator` trait; nothing here touches pipeline state.

use crate::cohort::{
    is_whole_school, ClusterSummary, CohortView, EarlyWarning, FairnessReport, StudentDetail,
    StudentOverview, SummaryReport,
};
use crate::error::{Result, ScholarError};
use crate::interventions::Intervention;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// At-risk students listed in a cohort snapshot
const SNAPSHOT_AT_RISK: usize = 20;
/// Top and bottom performers listed in a cohort snapshot
const SNAPSHOT_EXTREMES: usize = 5;

/// Who spoke a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

/// One earlier turn of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

/// Prompt plus conversation history handed to a generator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            history: Vec::new(),
        }
    }
}

/// External text generation service
pub trait TextGenerator: Send + Sync {
    /// Generate text for a request. Any error is reported to callers as
    /// `UpstreamUnavailable`.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Run `generator` on a worker thread, waiting at most `timeout`.
///
/// Errors, panics and timeouts all surface as `UpstreamUnavailable`. A timed
/// out worker is detached and its eventual result discarded.
pub fn generate_with_timeout(
    generator: Arc<dyn TextGenerator>,
    request: GenerationRequest,
    timeout: Duration,
) -> Result<String> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("scholar-narrative".to_owned())
        .spawn(move || {
            let result = generator.generate(&request);
            if tx.send(result).is_err() {
                debug!("narrative result dropped because the caller stopped waiting");
            }
        })?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(text)) => Ok(text.trim().to_string()),
        Ok(Err(ScholarError::UpstreamUnavailable(message))) => {
            warn!(error = %message, "text generation failed");
            Err(ScholarError::UpstreamUnavailable(message))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "text generation failed");
            Err(ScholarError::UpstreamUnavailable(e.to_string()))
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "text generation timed out");
            Err(ScholarError::UpstreamUnavailable(format!(
                "no response within {} ms",
                timeout.as_millis()
            )))
        }
        Err(RecvTimeoutError::Disconnected) => Err(ScholarError::UpstreamUnavailable(
            "generator stopped without a response".to_string(),
        )),
    }
}

/// Prompt asking for a plain-text explanation of one student
pub fn explain_student_prompt(student: &StudentDetail) -> Result<String> {
    let data = serde_json::to_string_pretty(student)?;
    Ok(format!(
        "You are an experienced, supportive educational advisor helping a teacher understand a student.\n\
         \n\
         Write a complete, detailed explanation of 500 to 800 words in plain paragraphs separated by one \
         blank line. Do not use Markdown, lists, headings or any emphasis markers.\n\
         \n\
         Student data:\n{data}\n\
         \n\
         Cover, in order: current performance and how well the student fits the {persona} persona; \
         strengths the teacher can build on; the main challenges or risk factors, stated factually and \
         kindly; two or three specific, practical recommendations; a closing encouraging note.\n\
         Refer to specific data points such as attendance, study hours and family income.\n",
        persona = student.cluster_name,
    ))
}

/// Prompt asking for intervention ideas, informed by earlier interventions
pub fn strategy_prompt(student: &StudentDetail, past: &[Intervention]) -> Result<String> {
    let data = serde_json::to_string_pretty(student)?;
    let mut prompt = format!(
        "You are a creative, realistic education strategist.\n\
         \n\
         Student in cluster: {}\n\
         \n\
         Data:\n{data}\n",
        student.cluster_name
    );
    if !past.is_empty() {
        let history = serde_json::to_string_pretty(past)?;
        let _ = write!(prompt, "\nPrevious interventions and outcomes:\n{history}\n");
    }
    prompt.push_str(
        "\nGenerate 4 to 5 practical, differentiated intervention ideas the teacher can realistically \
         implement: at least one low or no cost, at least one using technology, and at least one \
         involving peers or family when appropriate. Give each idea 3 to 5 sentences with clear action \
         steps. Write plain paragraphs separated by two blank lines, without Markdown, lists or numbering.\n",
    );
    Ok(prompt)
}

/// Cohort data injected into the assistant's context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortSnapshot {
    /// "the whole school" or a class section
    pub scope: String,
    pub summary: SummaryReport,
    pub clusters: Vec<ClusterSummary>,
    pub warnings: Vec<EarlyWarning>,
    pub fairness: FairnessReport,
    pub top: Vec<StudentOverview>,
    pub bottom: Vec<StudentOverview>,
}

impl CohortSnapshot {
    /// Capture a snapshot from a cohort view
    pub fn capture(view: &CohortView<'_>, scope: Option<&str>) -> Self {
        let mut students = view.students();
        students.sort_by(|a, b| b.exam_score.unwrap_or(0).cmp(&a.exam_score.unwrap_or(0)));
        let top = students.iter().take(SNAPSHOT_EXTREMES).cloned().collect();
        let bottom = students
            .iter()
            .skip(students.len().saturating_sub(SNAPSHOT_EXTREMES))
            .cloned()
            .collect();

        let scope = match scope.filter(|s| !is_whole_school(Some(*s))) {
            Some(class) => class.to_string(),
            None => "the whole school".to_string(),
        };

        Self {
            scope,
            summary: view.summary_report(),
            clusters: view.cluster_summary(),
            warnings: view.at_risk(),
            fairness: view.fairness(),
            top,
            bottom,
        }
    }

    /// Plain-text rendering used inside prompts
    pub fn render(&self) -> String {
        let mut out = String::new();
        let s = &self.summary;
        let _ = writeln!(out, "=== SCHOOL DATA CONTEXT: {} ===", self.scope.to_uppercase());
        let _ = writeln!(out);
        let _ = writeln!(out, "SUMMARY STATISTICS:");
        let _ = writeln!(out, "  Total students: {}", s.total_students);
        let _ = writeln!(out, "  Average exam score: {}", or_unknown(s.avg_exam_score));
        let _ = writeln!(out, "  High-risk share: {}%", s.high_risk_percent);
        let _ = writeln!(out, "  Average attendance: {}%", or_unknown(s.avg_attendance));
        let _ = writeln!(out, "  Average study hours/week: {}", or_unknown(s.avg_study_hours));
        let _ = writeln!(out, "  Average sleep hours/night: {}", or_unknown(s.avg_sleep));
        let _ = writeln!(out, "  Tutoring rate: {}%", or_unknown(s.tutoring_rate));

        let _ = writeln!(out, "\nPERSONA CLUSTERS:");
        if self.clusters.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for c in &self.clusters {
            let _ = writeln!(out, "  - {}: {} students, avg score {}", c.name, c.count, c.avg_score);
        }

        let _ = writeln!(
            out,
            "\nAT-RISK STUDENTS ({} total, showing up to {SNAPSHOT_AT_RISK}):",
            self.warnings.len()
        );
        if self.warnings.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for w in self.warnings.iter().take(SNAPSHOT_AT_RISK) {
            let _ = writeln!(
                out,
                "  - Student #{} | Score: {} | Cluster: {} | Issues: {}",
                w.index,
                w.score.map_or_else(|| "?".to_string(), |v| v.to_string()),
                w.cluster_name,
                w.issues.join(", ")
            );
        }

        let _ = writeln!(out, "\nALGORITHMIC FAIRNESS AUDIT:");
        for (group, impact) in [("gender", &self.fairness.gender), ("income", &self.fairness.income)] {
            let flag = serde_json::to_value(impact.flag)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let _ = writeln!(out, "  - {group}: ratio={}, flag={flag}", or_unknown(impact.ratio));
        }

        for (title, students) in [("TOP", &self.top), ("BOTTOM", &self.bottom)] {
            let _ = writeln!(out, "\n{title} {SNAPSHOT_EXTREMES} PERFORMERS:");
            for st in students {
                let _ = writeln!(
                    out,
                    "  - Student #{} | Score: {} | Cluster: {}",
                    st.index,
                    st.exam_score.map_or_else(|| "?".to_string(), |v| v.to_string()),
                    st.cluster_name
                );
            }
        }

        out.trim_end().to_string()
    }
}

/// Assistant prompt for a teacher's chat message
pub fn chat_prompt(snapshot: &CohortSnapshot, message: &str) -> String {
    format!(
        "You are an intelligent, warm and data-driven assistant for teachers. Help them understand \
         their students, spot at-risk learners and make evidence-based decisions.\n\
         \n\
         SCHOOL DATA (current):\n{}\n\
         \n\
         Answer using the data above and reference specific students, scores and clusters. Say so \
         honestly when a question goes beyond the data. Never fabricate student data.\n\
         \n\
         Teacher: {message}",
        snapshot.render()
    )
}

fn or_unknown(value: Option<f64>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    struct Echo;

    impl TextGenerator for Echo {
        fn generate(&self, request: &GenerationRequest) -> Result<String> {
            Ok(format!("  echo: {}\n", request.prompt))
        }
    }

    struct Failing;

    impl TextGenerator for Failing {
        fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            Err(ScholarError::Io(std::io::Error::other("connection reset")))
        }
    }

    struct Slow;

    impl TextGenerator for Slow {
        fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            thread::sleep(Duration::from_millis(500));
            Ok("late".to_string())
        }
    }

    fn labeled() -> Table {
        Table::from_reader(
            "Exam_Score,Gender,Family_Income,Persona_Cluster\n\
             70,Female,Low,The Overworked Achiever\n\
             88,Male,High,The Balanced Achiever\n\
             55,Female,High,The Disengaged Learner\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_generate_trims_output() {
        let text = generate_with_timeout(
            Arc::new(Echo),
            GenerationRequest::new("hi"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(text, "echo: hi");
    }

    #[test]
    fn test_generator_error_is_upstream_unavailable() {
        let err = generate_with_timeout(
            Arc::new(Failing),
            GenerationRequest::new("hi"),
            Duration::from_secs(5),
        )
        .unwrap_err();
        match err {
            ScholarError::UpstreamUnavailable(message) => assert!(message.contains("connection reset")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_timeout_is_upstream_unavailable() {
        let err = generate_with_timeout(
            Arc::new(Slow),
            GenerationRequest::new("hi"),
            Duration::from_millis(20),
        )
        .unwrap_err();
        assert!(matches!(err, ScholarError::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_cohort_snapshot_render() {
        let table = labeled();
        let view = CohortView::new(&table, None);
        let snapshot = CohortSnapshot::capture(&view, Some("School"));
        let text = snapshot.render();

        assert_eq!(snapshot.scope, "the whole school");
        assert!(text.starts_with("=== SCHOOL DATA CONTEXT: THE WHOLE SCHOOL ==="));
        assert!(text.contains("Student #2 | Score: 55 | Cluster: The Disengaged Learner"));
        assert!(text.contains("gender: ratio="));
        assert_eq!(snapshot.top[0].index, 1);

        let prompt = chat_prompt(&snapshot, "Who needs help?");
        assert!(prompt.ends_with("Teacher: Who needs help?"));
    }

    #[test]
    fn test_strategy_prompt_includes_history() {
        let table = labeled();
        let detail = CohortView::new(&table, None).student(0).unwrap();
        let without = strategy_prompt(&detail, &[]).unwrap();
        assert!(!without.contains("Previous interventions"));

        let past = vec![Intervention {
            id: 0,
            student_index: 0,
            strategy: "Rest days".to_string(),
            outcome: "Helped".to_string(),
            note: None,
            recorded_at: chrono::Utc::now(),
        }];
        let with = strategy_prompt(&detail, &past).unwrap();
        assert!(with.contains("Previous interventions and outcomes"));
        assert!(with.contains("Rest days"));

        let explain = explain_student_prompt(&detail).unwrap();
        assert!(explain.contains("The Overworked Achiever"));
    }
}
