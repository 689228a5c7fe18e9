//! Score prediction
//!
//! The score predictor owns the engineered training table, the raw reference
//! table and the fitted regression artifact:
//! - `fit` standardizes numeric columns, one-hot encodes categoricals and fits
//!   a Huber regressor on `Exam_Score`
//! - `predict` derives features, reconciles them to the frozen training schema
//!   and evaluates the model
//! - `retrain` appends uploaded rows to both tables and refits from scratch
//!
//! The artifact (schema, transform and model) is persisted as one JSON
//! document and only ever replaced whole.

use crate::baseline::ReferenceStats;
use crate::error::{Result, ScholarError};
use crate::features::FeatureDeriver;
use crate::preprocess::{fill_values, reconcile, ColumnTransformer};
use crate::regression::HuberRegressor;
use crate::table::{Cell, FeatureRow, Table};
use crate::types::{round_to, FeatureImportance, RawStudentRecord, EXAM_SCORE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Version of the persisted artifact layout
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Number of coefficients reported by `importance`
pub const IMPORTANCE_TOP_N: usize = 15;

/// Fitted transform + regressor, frozen with the schema it was trained on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreArtifact {
    pub format_version: u32,
    /// Identifies the fit that produced this artifact
    pub run_id: Uuid,
    pub fitted_at: DateTime<Utc>,
    /// Ordered input columns (training table minus `Exam_Score`)
    pub schema: Vec<String>,
    pub transformer: ColumnTransformer,
    pub model: HuberRegressor,
}

impl ScoreArtifact {
    /// Load an artifact from JSON, rejecting other format versions
    pub fn from_json(json: &str) -> Result<Self> {
        let artifact: Self = serde_json::from_str(json)?;
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ScholarError::Model(format!(
                "unsupported score artifact format {}",
                artifact.format_version
            )));
        }
        Ok(artifact)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Files backing a score predictor
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorPaths {
    /// Engineered training table
    pub training: PathBuf,
    /// Raw reference table
    pub reference: PathBuf,
    /// Persisted artifact
    pub artifact: PathBuf,
}

/// Regression pipeline from raw student records to an exam score
#[derive(Debug, Clone)]
pub struct ScorePredictor {
    paths: Option<PredictorPaths>,
    training: Table,
    reference: Table,
    stats: ReferenceStats,
    /// Unfitted regressor carrying the configured hyperparameters
    regressor: HuberRegressor,
    artifact: Option<ScoreArtifact>,
    /// Training-table mode per schema column
    fills: BTreeMap<String, Cell>,
}

impl ScorePredictor {
    /// Create an in-memory predictor; nothing is persisted
    pub fn new(training: Table, reference: Table) -> Self {
        let stats = ReferenceStats::from_table(&reference);
        Self {
            paths: None,
            training,
            reference,
            stats,
            regressor: HuberRegressor::new(),
            artifact: None,
            fills: BTreeMap::new(),
        }
    }

    /// Open a file-backed predictor. Both tables must exist.
    pub fn open(paths: PredictorPaths) -> Result<Self> {
        let training = Table::read_csv(&paths.training)?;
        let reference = Table::read_csv(&paths.reference)?;
        info!(
            training = %paths.training.display(),
            training_rows = training.len(),
            reference_rows = reference.len(),
            "score predictor tables loaded"
        );
        let mut predictor = Self::new(training, reference);
        predictor.paths = Some(paths);
        Ok(predictor)
    }

    /// Use a regressor with custom hyperparameters for future fits
    pub fn with_regressor(mut self, regressor: HuberRegressor) -> Self {
        self.regressor = regressor;
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn artifact(&self) -> Option<&ScoreArtifact> {
        self.artifact.as_ref()
    }

    /// The frozen training schema, once fitted
    pub fn schema(&self) -> Option<&[String]> {
        self.artifact.as_ref().map(|a| a.schema.as_slice())
    }

    pub fn training_table(&self) -> &Table {
        &self.training
    }

    pub fn reference_table(&self) -> &Table {
        &self.reference
    }

    pub fn reference_stats(&self) -> &ReferenceStats {
        &self.stats
    }

    /// Load the persisted artifact unless `retrain` is set or none exists,
    /// in which case fit and persist.
    pub fn load_or_fit(&mut self, retrain: bool) -> Result<()> {
        let artifact_path = self.paths.as_ref().map(|p| p.artifact.clone());
        if let Some(path) = artifact_path.filter(|p| !retrain && p.exists()) {
            match std::fs::read_to_string(&path)
                .map_err(ScholarError::from)
                .and_then(|json| ScoreArtifact::from_json(&json))
            {
                Ok(artifact) => {
                    info!(path = %path.display(), run_id = %artifact.run_id, "score artifact loaded");
                    self.install(artifact);
                    return Ok(());
                }
                Err(e) => warn!(path = %path.display(), error = %e, "score artifact unusable, refitting"),
            }
        }
        self.fit()
    }

    /// Fit on the current training table and persist the artifact
    pub fn fit(&mut self) -> Result<()> {
        let artifact = fit_artifact(&self.training, &self.regressor)?;
        if let Some(paths) = &self.paths {
            write_artifact(&paths.artifact, &artifact)?;
        }
        self.install(artifact);
        Ok(())
    }

    /// Engineered, name-keyed row for a raw record
    pub fn engineered_row(&self, record: &RawStudentRecord) -> FeatureRow {
        FeatureDeriver::derive_row(record, &self.stats)
    }

    /// Predicted exam score, rounded to one decimal
    pub fn predict(&self, record: &RawStudentRecord) -> Result<f64> {
        self.predict_row(&self.engineered_row(record))
    }

    /// Predict from an already-engineered row
    pub fn predict_row(&self, row: &FeatureRow) -> Result<f64> {
        let artifact = self
            .artifact
            .as_ref()
            .ok_or(ScholarError::NotInitialized("score predictor has not been fitted"))?;
        let reconciled = reconcile(row, &artifact.schema, &self.fills)?;
        let x = artifact.transformer.transform_row(&reconciled)?;
        let score = artifact.model.predict_one(&x)?;
        Ok(round_to(score, 1))
    }

    /// Append uploaded rows and refit.
    ///
    /// `uploaded` is the raw table as received and `records` its canonical
    /// records. Every record is validated and derived before anything is
    /// written; on failure the tables, the files and the artifact are left
    /// untouched. Returns the new reference row count.
    pub fn retrain(&mut self, uploaded: &Table, records: &[RawStudentRecord]) -> Result<usize> {
        if records.is_empty() {
            return Err(ScholarError::InvalidUpload("upload contains no rows".to_string()));
        }
        let engineered = FeatureDeriver::derive_table(records, &self.stats)?;

        // engineered rows never widen the training schema
        let kept: Vec<String> = self
            .training
            .columns()
            .iter()
            .filter(|c| engineered.has_column(c))
            .cloned()
            .collect();
        let engineered = engineered.select(&kept)?;

        let mut reference = self.reference.clone();
        reference.append(uploaded);
        let mut training = self.training.clone();
        training.append(&engineered);

        let artifact = fit_artifact(&training, &self.regressor)?;

        if let Some(paths) = &self.paths {
            persist_retrain(paths, &reference, &training, &artifact)?;
        }

        info!(
            uploaded = records.len(),
            reference_rows = reference.len(),
            training_rows = training.len(),
            "score predictor retrained"
        );

        self.stats = ReferenceStats::from_table(&reference);
        self.reference = reference;
        self.training = training;
        self.install(artifact);
        Ok(self.reference.len())
    }

    /// Largest coefficients by magnitude, paired with expanded feature names
    pub fn importance(&self) -> Result<Vec<FeatureImportance>> {
        let artifact = self
            .artifact
            .as_ref()
            .ok_or(ScholarError::NotInitialized("score predictor has not been fitted"))?;
        let coef = artifact
            .model
            .coefficients()
            .ok_or(ScholarError::NotInitialized("regressor has not been fitted"))?;

        let mut pairs: Vec<(String, f64)> = artifact
            .transformer
            .feature_names_out()
            .into_iter()
            .zip(coef.iter().copied())
            .collect();
        pairs.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));

        Ok(pairs
            .into_iter()
            .take(IMPORTANCE_TOP_N)
            .map(|(name, c)| FeatureImportance {
                name,
                importance: round_to(c, 3),
            })
            .collect())
    }

    fn install(&mut self, artifact: ScoreArtifact) {
        self.fills = fill_values(&self.training, &artifact.schema);
        self.artifact = Some(artifact);
    }
}

/// Fit transform + regressor on a training table
fn fit_artifact(training: &Table, template: &HuberRegressor) -> Result<ScoreArtifact> {
    let target_idx = training.column_index(EXAM_SCORE).ok_or_else(|| {
        ScholarError::SchemaMismatch(format!("training table has no {EXAM_SCORE} column"))
    })?;

    // rows without a target cannot be fitted
    let labeled = training.filter_rows(|_, row| row[target_idx].as_f64().is_some());
    let y: Vec<f64> = labeled
        .rows()
        .iter()
        .filter_map(|row| row[target_idx].as_f64())
        .collect();

    let features = labeled.drop_columns(&[EXAM_SCORE]);
    let transformer = ColumnTransformer::fit(&features)?;
    let x = transformer.transform_table(&features)?;

    let mut model = template.clone();
    model.fit(&x, &y)?;

    info!(
        rows = y.len(),
        columns = features.columns().len(),
        encoded = transformer.n_features_out(),
        iterations = model.n_iter(),
        "score predictor fitted"
    );

    Ok(ScoreArtifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        run_id: Uuid::new_v4(),
        fitted_at: Utc::now(),
        schema: features.columns().to_vec(),
        transformer,
        model,
    })
}

/// Write the three retrain outputs next to their targets, then rename them
/// into place. If any write fails the staged files are removed and the
/// targets are left as they were.
fn persist_retrain(
    paths: &PredictorPaths,
    reference: &Table,
    training: &Table,
    artifact: &ScoreArtifact,
) -> Result<()> {
    let targets = [&paths.reference, &paths.training, &paths.artifact];
    let staged = targets.map(|p| staging_path(p));

    let written = reference
        .write_csv(&staged[0])
        .and_then(|_| training.write_csv(&staged[1]))
        .and_then(|_| write_artifact(&staged[2], artifact));
    if let Err(e) = written {
        for path in &staged {
            let _ = std::fs::remove_file(path);
        }
        warn!(error = %e, "retrain outputs not written, previous files kept");
        return Err(e);
    }

    for (from, to) in staged.iter().zip(targets) {
        std::fs::rename(from, to)?;
    }
    Ok(())
}

/// Sibling path used while a file is being replaced
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".staged");
    path.with_file_name(name)
}

fn write_artifact(path: &Path, artifact: &ScoreArtifact) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, artifact.to_json()?)?;
    Ok(())
}
