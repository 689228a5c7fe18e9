//! Engine
//!
//! Owns both pipelines, the optional raw table and the intervention log, and
//! is the entry point for every operation:
//!
//! - predict / what-if: feature derivation, then score and persona
//! - upload: CSV ingestion and predictor retrain
//! - cohort queries over the labeled clustering table
//! - narrative prompts handed to a [`TextGenerator`]
//!
//! Each pipeline sits behind an `RwLock`. Predictions share read locks;
//! retrain holds the write lock for the whole derive, append, persist and fit
//! sequence.

use crate::adapters::CsvRecordAdapter;
use crate::clusterer::PersonaClusterer;
use crate::cohort::{
    ClusterSummary, CohortView, EarlyWarning, FairnessReport, StudentDetail, StudentOverview,
    SummaryReport, Timeline,
};
use crate::config::EngineConfig;
use crate::error::{Result, ScholarError};
use crate::interventions::{Intervention, InterventionLog, NewIntervention};
use crate::narrative::{
    chat_prompt, explain_student_prompt, generate_with_timeout, strategy_prompt, ChatTurn,
    CohortSnapshot, GenerationRequest, TextGenerator,
};
use crate::predictor::{PredictorPaths, ScorePredictor};
use crate::regression::HuberRegressor;
use crate::table::Table;
use crate::types::{
    round_to, FeatureImportance, Prediction, RawStudentRecord, UploadOutcome, WhatIfOutcome,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};
use uuid::Uuid;

/// Liveness report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub predictor_ready: bool,
    pub clusterer_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_run_id: Option<Uuid>,
    pub reference_rows: usize,
}

/// Shared context for predictions, uploads and cohort queries
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    predictor: RwLock<ScorePredictor>,
    clusterer: RwLock<PersonaClusterer>,
    interventions: Mutex<InterventionLog>,
    raw: Option<Table>,
}

impl Engine {
    /// Assemble an engine from prepared parts. Pipelines are used as given;
    /// unfitted ones answer with `NotInitialized`.
    pub fn new(config: EngineConfig, predictor: ScorePredictor, clusterer: PersonaClusterer) -> Self {
        Self {
            config,
            predictor: RwLock::new(predictor),
            clusterer: RwLock::new(clusterer),
            interventions: Mutex::new(InterventionLog::new()),
            raw: None,
        }
    }

    /// Raw table joined into per-student views
    pub fn with_raw_table(mut self, raw: Table) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_interventions(mut self, log: InterventionLog) -> Self {
        self.interventions = Mutex::new(log);
        self
    }

    /// Open the file-backed engine described by `config`.
    ///
    /// Loads persisted artifacts when present and `retrain` is false, else
    /// fits and persists both pipelines. The training, reference and
    /// clustering tables must exist; the raw table is optional.
    pub fn open(config: EngineConfig, retrain: bool) -> Result<Self> {
        let regressor = HuberRegressor::new()
            .with_epsilon(config.model.huber_epsilon)
            .with_alpha(config.model.huber_alpha)
            .with_max_iter(config.model.huber_max_iter);
        let mut predictor = ScorePredictor::open(PredictorPaths {
            training: config.training_path(),
            reference: config.reference_path(),
            artifact: config.score_artifact_path(),
        })?
        .with_regressor(regressor);
        predictor.load_or_fit(retrain)?;

        let mut clusterer =
            PersonaClusterer::open(config.clustering_path(), config.persona_artifact_path())?
                .with_seed(config.model.seed)
                .with_n_init(config.model.kmeans_n_init);
        clusterer.load_or_fit(retrain)?;

        let raw = match Table::read_csv(config.raw_path()) {
            Ok(table) => Some(table),
            Err(ScholarError::DataNotFound(path)) => {
                warn!(path = %path.display(), "raw student table not found, cohort views use engineered columns only");
                None
            }
            Err(e) => return Err(e),
        };

        let log = InterventionLog::open(config.interventions_path())?;

        info!(
            data_dir = %config.data.data_dir.display(),
            raw_table = raw.is_some(),
            interventions = log.len(),
            "engine ready"
        );

        Ok(Self {
            config,
            predictor: RwLock::new(predictor),
            clusterer: RwLock::new(clusterer),
            interventions: Mutex::new(log),
            raw,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn predictor(&self) -> Result<RwLockReadGuard<'_, ScorePredictor>> {
        self.predictor
            .read()
            .map_err(|_| ScholarError::Poisoned("score predictor"))
    }

    fn predictor_mut(&self) -> Result<RwLockWriteGuard<'_, ScorePredictor>> {
        self.predictor
            .write()
            .map_err(|_| ScholarError::Poisoned("score predictor"))
    }

    fn clusterer(&self) -> Result<RwLockReadGuard<'_, PersonaClusterer>> {
        self.clusterer
            .read()
            .map_err(|_| ScholarError::Poisoned("persona clusterer"))
    }

    fn log(&self) -> Result<MutexGuard<'_, InterventionLog>> {
        self.interventions
            .lock()
            .map_err(|_| ScholarError::Poisoned("intervention log"))
    }

    /// Score and persona for one raw record
    pub fn predict(&self, record: &RawStudentRecord) -> Result<Prediction> {
        let (row, score) = {
            let predictor = self.predictor()?;
            let row = predictor.engineered_row(record);
            let score = predictor.predict_row(&row)?;
            (row, score)
        };
        let persona = self.clusterer()?.predict_persona(&row)?;
        Ok(Prediction {
            predicted_score: score,
            predicted_persona: persona,
        })
    }

    /// Compare `original` with a copy where the fields present in `changes`
    /// replace the originals
    pub fn what_if(
        &self,
        original: &RawStudentRecord,
        changes: &RawStudentRecord,
    ) -> Result<WhatIfOutcome> {
        let modified = original.merged_with(changes);
        let before = self.predict(original)?;
        let after = self.predict(&modified)?;
        Ok(WhatIfOutcome {
            original: before.predicted_score,
            new: after.predicted_score,
            difference: round_to(after.predicted_score - before.predicted_score, 1),
            original_persona: before.predicted_persona,
            new_persona: after.predicted_persona,
            persona_changed: before.predicted_persona != after.predicted_persona,
        })
    }

    /// Ingest raw CSV text and retrain the score predictor
    pub fn upload_csv(&self, input: &str) -> Result<UploadOutcome> {
        let (table, records) = CsvRecordAdapter::parse_table(input)?;
        let total = self.predictor_mut()?.retrain(&table, &records)?;
        Ok(UploadOutcome {
            success: true,
            new_students_uploaded: records.len(),
            total_students_now: total,
        })
    }

    /// Refit the persona clusterer over its table
    pub fn retrain_clusterer(&self) -> Result<()> {
        self.clusterer
            .write()
            .map_err(|_| ScholarError::Poisoned("persona clusterer"))?
            .fit()
    }

    pub fn importance(&self) -> Result<Vec<FeatureImportance>> {
        self.predictor()?.importance()
    }

    pub fn health(&self) -> Result<Health> {
        let predictor = self.predictor()?;
        let clusterer = self.clusterer()?;
        Ok(Health {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            predictor_ready: predictor.is_fitted(),
            clusterer_ready: clusterer.is_fitted(),
            score_run_id: predictor.artifact().map(|a| a.run_id),
            persona_run_id: clusterer.artifact().map(|a| a.run_id),
            reference_rows: predictor.reference_table().len(),
        })
    }

    /// Run `query` against a cohort view, optionally limited to one class
    pub fn cohort<R>(&self, class: Option<&str>, query: impl FnOnce(&CohortView<'_>) -> R) -> Result<R> {
        let clusterer = self.clusterer()?;
        if !clusterer.is_fitted() {
            return Err(ScholarError::NotInitialized("persona clusterer has not been fitted"));
        }
        let view = CohortView::new(clusterer.labeled_table(), self.raw.as_ref()).for_class(class);
        Ok(query(&view))
    }

    pub fn cluster_summary(&self, class: Option<&str>) -> Result<Vec<ClusterSummary>> {
        self.cohort(class, |view| view.cluster_summary())
    }

    pub fn at_risk(&self, class: Option<&str>) -> Result<Vec<EarlyWarning>> {
        self.cohort(class, |view| view.at_risk())
    }

    pub fn students(&self, class: Option<&str>) -> Result<Vec<StudentOverview>> {
        self.cohort(class, |view| view.students())
    }

    pub fn student(&self, index: usize) -> Result<StudentDetail> {
        self.cohort(None, |view| view.student(index))?
            .ok_or(ScholarError::StudentNotFound(index))
    }

    /// Synthetic timeline seeded from the configured seed
    pub fn timeline(&self, index: usize) -> Result<Timeline> {
        let seed = self.config.model.seed;
        self.cohort(None, |view| view.timeline(index, seed))?
            .ok_or(ScholarError::StudentNotFound(index))
    }

    pub fn summary_report(&self, class: Option<&str>) -> Result<SummaryReport> {
        self.cohort(class, |view| view.summary_report())
    }

    pub fn fairness(&self, class: Option<&str>) -> Result<FairnessReport> {
        self.cohort(class, |view| view.fairness())
    }

    /// Record an intervention for an existing student
    pub fn record_intervention(&self, new: NewIntervention) -> Result<Intervention> {
        let known = self.cohort(None, |view| view.student(new.student_index).is_some())?;
        if !known {
            return Err(ScholarError::StudentNotFound(new.student_index));
        }
        let mut log = self.log()?;
        let id = log.append(new)?;
        log.list()
            .get(id)
            .cloned()
            .ok_or(ScholarError::Poisoned("intervention log"))
    }

    pub fn interventions(&self) -> Result<Vec<Intervention>> {
        Ok(self.log()?.list().to_vec())
    }

    pub fn interventions_for(&self, student_index: usize) -> Result<Vec<Intervention>> {
        Ok(self
            .log()?
            .list()
            .iter()
            .filter(|i| i.student_index == student_index)
            .cloned()
            .collect())
    }

    /// Plain-language explanation of one student
    pub fn explain_student(&self, generator: Arc<dyn TextGenerator>, index: usize) -> Result<String> {
        let prompt = explain_student_prompt(&self.student(index)?)?;
        self.generate(generator, GenerationRequest::new(prompt))
    }

    /// Intervention ideas for one student, informed by what was tried before
    pub fn suggest_strategies(&self, generator: Arc<dyn TextGenerator>, index: usize) -> Result<String> {
        let student = self.student(index)?;
        let past = self.interventions_for(index)?;
        let prompt = strategy_prompt(&student, &past)?;
        self.generate(generator, GenerationRequest::new(prompt))
    }

    /// Answer a teacher's question with the cohort snapshot in context
    pub fn chat(
        &self,
        generator: Arc<dyn TextGenerator>,
        class: Option<&str>,
        message: &str,
        history: Vec<ChatTurn>,
    ) -> Result<String> {
        let snapshot = self.cohort(class, |view| CohortSnapshot::capture(view, class))?;
        let request = GenerationRequest {
            prompt: chat_prompt(&snapshot, message),
            history,
        };
        self.generate(generator, request)
    }

    fn generate(&self, generator: Arc<dyn TextGenerator>, request: GenerationRequest) -> Result<String> {
        generate_with_timeout(generator, request, self.config.narrative_timeout())
    }
}
