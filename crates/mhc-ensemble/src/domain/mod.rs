//! Domain models for predictor ensembles.
//!
//! - `Allele` / `ModelScope`: partition keys
//! - `Hyperparameters` / `FitHistory`: structured manifest payloads
//! - `ModelRecord` / `ModelName`: manifest rows and storage keys

pub mod allele;
pub mod error;
pub mod hyperparameters;
pub mod record;

pub use allele::{Allele, AlleleNormalizer, ModelScope, StandardAlleleNormalizer, PAN_ALLELE_LABEL};
pub use error::{EnsembleError, PredictorError, Result};
pub use hyperparameters::{FitHistory, Hyperparameters};
pub use record::{ModelName, ModelRecord};
