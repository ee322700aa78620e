//! Seam between the ensemble and individual trainable regressors.
//!
//! The ensemble never looks inside a predictor: it builds one from a
//! hyperparameter set, fits it, asks it for affinities and stores whatever
//! bytes it serializes itself to.

pub mod baseline;
pub mod encoding;

use crate::domain::{FitHistory, Hyperparameters, PredictorError};

pub use baseline::PositionalMeanPredictor;
pub use encoding::EncodableSequences;

pub type PredictorResult<T> = std::result::Result<T, PredictorError>;

/// A single trainable affinity regressor.
///
/// Predictions are affinities (nM IC50) and must be strictly positive; the
/// ensemble aggregates them with a geometric mean.
pub trait TrainablePredictor: Sized + Send + 'static {
    /// Build an untrained predictor.
    fn from_hyperparameters(hyperparameters: &Hyperparameters) -> PredictorResult<Self>;

    /// Fit on `peptides` / `affinities`. `pseudosequences` is row-aligned and
    /// only supplied for pan-allele training.
    fn fit(
        &mut self,
        peptides: &EncodableSequences,
        affinities: &[f64],
        output_assignments: &[String],
        pseudosequences: Option<&[String]>,
    ) -> PredictorResult<()>;

    /// One affinity per input row.
    fn predict(
        &self,
        peptides: &EncodableSequences,
        pseudosequences: Option<&[String]>,
    ) -> PredictorResult<Vec<f64>>;

    /// Wall-clock seconds spent in the last `fit`.
    fn fit_seconds(&self) -> f64;

    fn fit_history(&self) -> &FitHistory;

    /// Opaque serialized state.
    fn to_artifact(&self) -> PredictorResult<Vec<u8>>;

    fn from_artifact(bytes: &[u8]) -> PredictorResult<Self>;
}
