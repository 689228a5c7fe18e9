//! Intervention log
//!
//! Records what was tried with a student and how it went. Entries get a
//! sequential id and a UTC timestamp and are listed in insertion order. The
//! log lives in memory and is optionally mirrored to a JSON file.

use crate::error::{Result, ScholarError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Caller-supplied part of an intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIntervention {
    pub student_index: usize,
    pub strategy: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A recorded intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    pub id: usize,
    pub student_index: usize,
    pub strategy: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only intervention log
#[derive(Debug, Clone, Default)]
pub struct InterventionLog {
    entries: Vec<Intervention>,
    path: Option<PathBuf>,
}

impl InterventionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a log mirrored to `path`, loading existing entries if the file
    /// exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        Ok(Self {
            entries,
            path: Some(path),
        })
    }

    /// Record an intervention; returns its id
    pub fn append(&mut self, new: NewIntervention) -> Result<usize> {
        if new.strategy.trim().is_empty() || new.outcome.trim().is_empty() {
            return Err(ScholarError::InvalidUpload(
                "intervention needs a strategy and an outcome".to_string(),
            ));
        }

        let id = self.entries.len();
        self.entries.push(Intervention {
            id,
            student_index: new.student_index,
            strategy: new.strategy,
            outcome: new.outcome,
            note: new.note,
            recorded_at: Utc::now(),
        });

        if let Err(e) = self.persist() {
            self.entries.pop();
            return Err(e);
        }
        debug!(id, student = self.entries[id].student_index, "intervention recorded");
        Ok(id)
    }

    /// All entries in insertion order
    pub fn list(&self) -> &[Intervention] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tutoring(student_index: usize) -> NewIntervention {
        NewIntervention {
            student_index,
            strategy: "Weekly tutoring".to_string(),
            outcome: "Improved".to_string(),
            note: None,
        }
    }

    #[test]
    fn test_sequential_ids_in_order() {
        let mut log = InterventionLog::new();
        assert_eq!(log.append(tutoring(4)).unwrap(), 0);
        assert_eq!(log.append(tutoring(9)).unwrap(), 1);

        let indices: Vec<usize> = log.list().iter().map(|i| i.student_index).collect();
        assert_eq!(indices, vec![4, 9]);
    }

    #[test]
    fn test_rejects_blank_strategy() {
        let mut log = InterventionLog::new();
        let mut blank = tutoring(1);
        blank.strategy = "  ".to_string();
        assert!(log.append(blank).is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn test_payload_field_names() {
        let parsed: NewIntervention = serde_json::from_str(
            r#"{"studentIndex": 3, "strategy": "Mentoring", "outcome": "Pending"}"#,
        )
        .unwrap();
        assert_eq!(parsed.student_index, 3);
        assert_eq!(parsed.note, None);
    }

    #[test]
    fn test_persisted_log_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interventions.json");

        let mut log = InterventionLog::open(&path).unwrap();
        log.append(tutoring(2)).unwrap();

        let reloaded = InterventionLog::open(&path).unwrap();
        assert_eq!(reloaded.list(), log.list());
    }
}
