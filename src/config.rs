//! Engine configuration
//!
//! Loaded from an optional TOML file; every key has a default so an empty
//! file (or no file) yields a working setup:
//!
//! ```toml
//! [data]
//! data_dir = "data"
//! models_dir = "models"
//!
//! [model]
//! seed = 42
//! kmeans_n_init = 4
//! huber_epsilon = 1.35
//!
//! [narrative]
//! timeout_ms = 30000
//! ```

use crate::error::{Result, ScholarError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding the CSV tables
    pub data_dir: PathBuf,
    /// Directory holding fitted artifacts and the intervention log
    pub models_dir: PathBuf,
    pub training_file: String,
    pub reference_file: String,
    pub clustering_file: String,
    /// Optional raw table joined into per-student views
    pub raw_file: String,
    pub score_artifact: String,
    pub persona_artifact: String,
    pub interventions_file: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            models_dir: PathBuf::from("models"),
            training_file: "optimised_final_dataset.csv".to_string(),
            reference_file: "combined_student_data.csv".to_string(),
            clustering_file: "dashboard_ready_student_data_kmeans.csv".to_string(),
            raw_file: "Student_data.csv".to_string(),
            score_artifact: "score_pipeline.json".to_string(),
            persona_artifact: "persona_pipeline.json".to_string(),
            interventions_file: "interventions.json".to_string(),
        }
    }
}

/// Model hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub seed: u64,
    pub kmeans_n_init: usize,
    pub huber_epsilon: f64,
    pub huber_alpha: f64,
    pub huber_max_iter: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            kmeans_n_init: 4,
            huber_epsilon: 1.35,
            huber_alpha: 1e-4,
            huber_max_iter: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub timeout_ms: u64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub narrative: NarrativeConfig,
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScholarError::DataNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ScholarError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Point both directories at `dir`
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.data.models_dir = dir.join("models");
        self.data.data_dir = dir;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.model.kmeans_n_init == 0 {
            return Err(ScholarError::Config("model.kmeans_n_init must be at least 1".into()));
        }
        if self.model.huber_epsilon.is_nan() || self.model.huber_epsilon <= 1.0 {
            return Err(ScholarError::Config("model.huber_epsilon must be greater than 1".into()));
        }
        if self.model.huber_alpha < 0.0 {
            return Err(ScholarError::Config("model.huber_alpha must not be negative".into()));
        }
        if self.model.huber_max_iter == 0 {
            return Err(ScholarError::Config("model.huber_max_iter must be at least 1".into()));
        }
        Ok(())
    }

    pub fn training_path(&self) -> PathBuf {
        self.data.data_dir.join(&self.data.training_file)
    }

    pub fn reference_path(&self) -> PathBuf {
        self.data.data_dir.join(&self.data.reference_file)
    }

    pub fn clustering_path(&self) -> PathBuf {
        self.data.data_dir.join(&self.data.clustering_file)
    }

    pub fn raw_path(&self) -> PathBuf {
        self.data.data_dir.join(&self.data.raw_file)
    }

    pub fn score_artifact_path(&self) -> PathBuf {
        self.data.models_dir.join(&self.data.score_artifact)
    }

    pub fn persona_artifact_path(&self) -> PathBuf {
        self.data.models_dir.join(&self.data.persona_artifact)
    }

    pub fn interventions_path(&self) -> PathBuf {
        self.data.models_dir.join(&self.data.interventions_file)
    }

    pub fn narrative_timeout(&self) -> Duration {
        Duration::from_millis(self.narrative.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [data]
            data_dir = "/srv/school"

            [model]
            seed = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.data.data_dir, PathBuf::from("/srv/school"));
        assert_eq!(config.model.seed, 7);
        assert_eq!(config.model.kmeans_n_init, 4);
        assert_eq!(
            config.training_path(),
            PathBuf::from("/srv/school/optimised_final_dataset.csv")
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::from_toml("[model]\nkmeans_n_init = 0"),
            Err(ScholarError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("[model]\nseed = \"abc\""),
            Err(ScholarError::Config(_))
        ));
    }

    #[test]
    fn test_with_data_dir_moves_models() {
        let config = EngineConfig::default().with_data_dir("/tmp/x");
        assert_eq!(
            config.score_artifact_path(),
            PathBuf::from("/tmp/x/models/score_pipeline.json")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scholar.toml");
        std::fs::write(&path, "[narrative]\ntimeout_ms = 500\n").unwrap();

        let config = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.narrative_timeout(), Duration::from_millis(500));
        assert!(EngineConfig::load_from_file(dir.path().join("missing.toml")).is_err());
    }
}
