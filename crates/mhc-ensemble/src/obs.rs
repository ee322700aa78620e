//! Structured observability hooks for ensemble lifecycle events.
//!
//! This module provides:
//! - Fit-batch tracing spans via the `FitSpan` RAII guard
//! - Emission functions for model training, persistence, loading and prediction
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::info;

/// RAII guard that enters a span for one fit batch.
///
/// # Example
///
/// ```ignore
/// let _span = FitSpan::enter("HLA-A0101", 4);
/// // tracing calls below carry scope = "HLA-A0101", n_models = 4
/// ```
pub struct FitSpan {
    _span: tracing::span::EnteredSpan,
}

impl FitSpan {
    pub fn enter(scope: &str, n_models: usize) -> Self {
        let span = tracing::info_span!("mhc_ensemble.fit", scope = %scope, n_models = n_models);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: one sub-model finished training and was registered.
pub fn emit_model_trained(
    name: &str,
    scope: &str,
    index: usize,
    n_models: usize,
    fit_seconds: f64,
    num_measurements: usize,
) {
    info!(
        event = "model.trained",
        model = %name,
        scope = %scope,
        index = index,
        n_models = n_models,
        fit_seconds = fit_seconds,
        num_measurements = num_measurements,
    );
}

/// Emit event: a model artifact was written.
pub fn emit_model_saved(name: &str, path: &std::path::Path, bytes: usize) {
    info!(event = "model.saved", model = %name, path = %path.display(), bytes = bytes);
}

/// Emit event: the manifest was rewritten.
pub fn emit_manifest_written(path: &std::path::Path, rows: usize) {
    info!(event = "manifest.written", path = %path.display(), rows = rows);
}

/// Emit event: an ensemble was loaded from disk.
pub fn emit_ensemble_loaded(
    dir: &std::path::Path,
    pan_allele_models: usize,
    pseudosequences: usize,
    allele_specific_models: usize,
    alleles: &str,
) {
    info!(
        event = "ensemble.loaded",
        dir = %dir.display(),
        pan_allele_models = pan_allele_models,
        pseudosequences = pseudosequences,
        allele_specific_models = allele_specific_models,
        alleles = %alleles,
    );
}

/// Emit event: a prediction batch was aggregated.
pub fn emit_prediction(rows: usize, contributing_models: usize, rows_without_models: usize) {
    info!(
        event = "ensemble.predicted",
        rows = rows,
        contributing_models = contributing_models,
        rows_without_models = rows_without_models,
    );
}

/// Emit event: a sub-model fit failed (warning level).
pub fn emit_fit_failed(scope: &str, index: usize, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "model.fit_failed", scope = %scope, index = index, error = %error);
}
