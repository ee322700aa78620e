//! Observability tests for ensemble lifecycle tracing.
//!
//! These tests verify that structured tracing events are emitted for the key
//! lifecycle points: model training, persistence, loading and prediction.

mod common;

use common::synthetic_dataset;
use mhc_ensemble::{
    emit_fit_failed, emit_manifest_written, emit_model_trained, Ensemble, FitOptions, FitSpan,
    Hyperparameters, PositionalMeanPredictor, PredictOptions,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_model_trained_logs_name_and_scope() {
    emit_model_trained("HLA-A0101-0-0123456789abcdef", "HLA-A0101", 0, 2, 0.25, 50);
    assert!(logs_contain("model.trained"));
    assert!(logs_contain("HLA-A0101-0-0123456789abcdef"));
}

#[traced_test]
#[test]
fn test_emit_manifest_written_logs_rows() {
    emit_manifest_written(std::path::Path::new("/tmp/models/manifest.csv"), 3);
    assert!(logs_contain("manifest.written"));
}

#[traced_test]
#[test]
fn test_emit_fit_failed_logs_warning() {
    emit_fit_failed("pan-class1", 1, &"peptide_length must be positive");
    assert!(logs_contain("model.fit_failed"));
    assert!(logs_contain("peptide_length must be positive"));
}

#[traced_test]
#[test]
fn test_fit_span_enter_creates_span() {
    let span = FitSpan::enter("HLA-A0201", 4);
    drop(span);
}

#[traced_test]
#[test]
fn test_full_lifecycle_emits_events() {
    let tmp = tempfile::tempdir().unwrap();
    let (peptides, affinities) = synthetic_dataset(8);

    let mut ensemble = Ensemble::<PositionalMeanPredictor>::new();
    ensemble
        .fit_allele_specific(
            1,
            &Hyperparameters::new(),
            "HLA-A0201",
            &peptides,
            &affinities,
            FitOptions::new().with_persist_dir(tmp.path()),
        )
        .unwrap();
    assert!(logs_contain("model.trained"));
    assert!(logs_contain("model.saved"));
    assert!(logs_contain("manifest.written"));

    let reloaded = Ensemble::<PositionalMeanPredictor>::load(tmp.path(), None).unwrap();
    assert!(logs_contain("ensemble.loaded"));
    assert!(logs_contain("HLA-A0201 (1)"));

    reloaded
        .predict(&peptides[..2], &["HLA-A0201", "HLA-B0702"], PredictOptions::default())
        .unwrap();
    assert!(logs_contain("ensemble.predicted"));
    assert!(logs_contain("rows_without_models=1"));
}
