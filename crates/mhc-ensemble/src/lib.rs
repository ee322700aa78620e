//! MHC Ensemble Library
//!
//! Coordinates ensembles of peptide/MHC binding-affinity predictors:
//! allele-specific and pan-allele sub-models, a persisted manifest, and
//! geometric-mean aggregation of their predictions.

pub mod config;
pub mod domain;
pub mod ensemble;
pub mod manifest;
pub mod metrics;
pub mod obs;
pub mod predictor;
pub mod store;
pub mod telemetry;

pub use config::{ParallelFitConfig, MAX_CONCURRENT_ENV};

pub use domain::{
    Allele, AlleleNormalizer, EnsembleError, FitHistory, Hyperparameters, ModelName, ModelRecord,
    ModelScope, PredictorError, Result, StandardAlleleNormalizer, PAN_ALLELE_LABEL,
};

pub use ensemble::{
    Ensemble, FitOptions, ModelColumn, PredictOptions, PredictionTable, DEFAULT_OUTPUT_ASSIGNMENT,
};

pub use manifest::Manifest;
pub use predictor::{EncodableSequences, PositionalMeanPredictor, TrainablePredictor};
pub use store::{artifact_digest, EnsembleDir, MANIFEST_FILE, PSEUDOSEQUENCES_FILE};

pub use metrics::METRICS;
pub use obs::{
    emit_ensemble_loaded, emit_fit_failed, emit_manifest_written, emit_model_saved,
    emit_model_trained, emit_prediction, FitSpan,
};
pub use telemetry::init_tracing;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
