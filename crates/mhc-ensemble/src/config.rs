//! Runtime configuration for parallel training.

use serde::{Deserialize, Serialize};

use crate::domain::error::{EnsembleError, Result};

/// Environment variable overriding [`ParallelFitConfig::max_concurrent`].
pub const MAX_CONCURRENT_ENV: &str = "MHC_ENSEMBLE_MAX_CONCURRENT";

/// Configuration for a parallel fit batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParallelFitConfig {
    /// Maximum number of sub-models fitting at once.
    pub max_concurrent: usize,
}

impl Default for ParallelFitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl ParallelFitConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - MHC_ENSEMBLE_MAX_CONCURRENT (optional, default: available parallelism)
    pub fn from_env() -> Result<Self> {
        match std::env::var(MAX_CONCURRENT_ENV) {
            Ok(raw) => Self::default().with_max_concurrent_str(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    fn with_max_concurrent_str(self, raw: &str) -> Result<Self> {
        let value: usize = raw.trim().parse().map_err(|_| {
            EnsembleError::InvalidInput(format!("{MAX_CONCURRENT_ENV} must be an integer, got {raw:?}"))
        })?;
        if value == 0 {
            return Err(EnsembleError::InvalidInput(format!(
                "{MAX_CONCURRENT_ENV} must be at least 1"
            )));
        }
        Ok(self.with_max_concurrent(value))
    }
}
