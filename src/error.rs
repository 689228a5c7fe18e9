//! Error types for Scholar Flux

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while fitting, persisting or querying the pipelines
#[derive(Debug, Error)]
pub enum ScholarError {
    #[error("Required data file not found: {}", .0.display())]
    DataNotFound(PathBuf),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Pipeline not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("Cluster id {0} is not covered by the fitted persona mapping")]
    UnmappedCluster(usize),

    #[error("No student at index {0}")]
    StudentNotFound(usize),

    #[error("Engine state poisoned: {0}")]
    Poisoned(&'static str),

    #[error("Text generation unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Model fitting failed: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ScholarError>;
