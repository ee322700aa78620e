//! Error taxonomy for ensemble training, persistence and serving.

use std::path::PathBuf;

/// Errors reported by a single trainable predictor.
#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("invalid hyperparameters: {0}")]
    InvalidHyperparameters(String),

    #[error("fit failed: {0}")]
    Fit(String),

    #[error("predict failed: {0}")]
    Predict(String),

    #[error("artifact error: {0}")]
    Artifact(String),
}

/// Ensemble domain errors.
#[derive(Debug, thiserror::Error)]
pub enum EnsembleError {
    #[error("manifest out of sync with models: {manifest_rows} rows vs {live_models} models")]
    ManifestOutOfSync {
        manifest_rows: usize,
        live_models: usize,
    },

    #[error("no pseudosequence for alleles: {}", alleles.join(", "))]
    UnresolvablePseudosequences { alleles: Vec<String> },

    #[error("pan-allele models require a non-empty pseudosequence table")]
    MissingPseudosequences,

    #[error("missing artifact for model {name}: {}", path.display())]
    MissingArtifact { name: String, path: PathBuf },

    #[error("artifact digest mismatch for model {name}: expected {expected}, got {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid allele: {0}")]
    InvalidAllele(String),

    #[error("aggregation fault: expected {expected} rows, got {actual}")]
    AggregationFault { expected: usize, actual: usize },

    #[error("model {model} produced non-positive prediction {value}")]
    NonPositivePrediction { model: String, value: f64 },

    #[error("predictor error: {0}")]
    Predictor(#[from] PredictorError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("worker task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for ensemble operations.
pub type Result<T> = std::result::Result<T, EnsembleError>;
