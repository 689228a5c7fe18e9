//! Scholar Flux - score prediction and persona clustering for student outcomes
//!
//! Raw student records flow through a deterministic pipeline: alias
//! adaptation → normalization → feature derivation → {Huber score regression,
//! k-means persona assignment}.
//!
//! ## Modules
//!
//! - **Prediction**: engineered features, preprocessing and a robust linear
//!   model estimating the exam score, with feature importance and what-if
//! - **Personas**: k-means over the clustering table with a fixed mapping onto
//!   four behavioral archetypes
//! - **Cohort**: read-only summaries, early warnings, fairness audit and
//!   timelines over the labeled table
//! - **Narrative**: prompt formatting for an external text generator

pub mod adapters;
pub mod baseline;
pub mod clusterer;
pub mod cohort;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod interventions;
pub mod kmeans;
pub mod narrative;
pub mod normalizer;
pub mod predictor;
pub mod preprocess;
pub mod regression;
pub mod table;
pub mod types;

pub use adapters::{CsvRecordAdapter, JsonRecordAdapter, RecordAdapter};
pub use clusterer::PersonaClusterer;
pub use cohort::CohortView;
pub use config::EngineConfig;
pub use engine::{Engine, Health};
pub use error::{Result, ScholarError};
pub use features::FeatureDeriver;
pub use interventions::{Intervention, InterventionLog, NewIntervention};
pub use narrative::{generate_with_timeout, GenerationRequest, TextGenerator};
pub use predictor::ScorePredictor;
pub use table::{Cell, Table};
pub use types::{
    PersonaLabel, Prediction, RawStudentRecord, UploadOutcome, WhatIfOutcome, FEATURE_NAMES,
};

/// Crate version recorded in CLI output
pub const SCHOLAR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for CLI output
pub const PRODUCER_NAME: &str = "scholar-flux";
