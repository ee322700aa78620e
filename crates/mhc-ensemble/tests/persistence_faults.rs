//! Load/save failure modes of a persisted ensemble directory.

mod common;

use common::synthetic_dataset;
use mhc_ensemble::{
    Ensemble, EnsembleError, FitOptions, Hyperparameters, PositionalMeanPredictor, MANIFEST_FILE,
};

type Baseline = Ensemble<PositionalMeanPredictor>;

fn saved_ensemble(dir: &std::path::Path) -> Baseline {
    let (peptides, affinities) = synthetic_dataset(12);
    let mut ensemble = Baseline::new();
    ensemble
        .fit_allele_specific(
            2,
            &Hyperparameters::new(),
            "HLA-A0201",
            &peptides,
            &affinities,
            FitOptions::new(),
        )
        .unwrap();
    ensemble.save(dir, None).unwrap();
    ensemble
}

#[test]
fn test_missing_artifact_fails_load() {
    let tmp = tempfile::tempdir().unwrap();
    let ensemble = saved_ensemble(tmp.path());
    let victim = &ensemble.manifest().rows()[1].name;
    std::fs::remove_file(tmp.path().join(victim.artifact_file_name())).unwrap();

    match Baseline::load(tmp.path(), None) {
        Err(EnsembleError::MissingArtifact { name, path }) => {
            assert_eq!(name, victim.to_string());
            assert!(path.ends_with(victim.artifact_file_name()));
        }
        other => panic!("expected MissingArtifact, got {other:?}"),
    }
}

#[test]
fn test_missing_artifact_beyond_max_models_is_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let ensemble = saved_ensemble(tmp.path());
    let victim = &ensemble.manifest().rows()[1].name;
    std::fs::remove_file(tmp.path().join(victim.artifact_file_name())).unwrap();

    let partial = Baseline::load(tmp.path(), Some(1)).unwrap();
    assert_eq!(partial.num_models(), 1);
}

#[test]
fn test_tampered_artifact_fails_digest_check() {
    let tmp = tempfile::tempdir().unwrap();
    let ensemble = saved_ensemble(tmp.path());
    let victim = &ensemble.manifest().rows()[0].name;
    let path = tmp.path().join(victim.artifact_file_name());
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.push(b' ');
    std::fs::write(&path, bytes).unwrap();

    match Baseline::load(tmp.path(), None) {
        Err(EnsembleError::DigestMismatch { name, expected, actual }) => {
            assert_eq!(name, victim.to_string());
            assert_ne!(expected, actual);
        }
        other => panic!("expected DigestMismatch, got {other:?}"),
    }
}

#[test]
fn test_duplicate_manifest_names_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    saved_ensemble(tmp.path());
    let manifest_path = tmp.path().join(MANIFEST_FILE);
    let text = std::fs::read_to_string(&manifest_path).unwrap();
    let first_row = text.lines().nth(1).unwrap().to_string();
    std::fs::write(&manifest_path, format!("{text}{first_row}\n")).unwrap();

    assert!(matches!(
        Baseline::load(tmp.path(), None),
        Err(EnsembleError::InvalidManifest(_))
    ));
}

#[test]
fn test_load_from_missing_directory_fails() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(matches!(
        Baseline::load(tmp.path().join("nope"), None),
        Err(EnsembleError::Io(_))
    ));
}

#[test]
fn test_manifest_without_digest_column_still_loads() {
    let tmp = tempfile::tempdir().unwrap();
    let ensemble = saved_ensemble(tmp.path());

    // drop the artifact_sha256 and trained_at columns
    let manifest_path = tmp.path().join(MANIFEST_FILE);
    let mut reader = csv::Reader::from_path(&manifest_path).unwrap();
    let headers = reader.headers().unwrap().clone();
    let keep: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| *h != "artifact_sha256" && *h != "trained_at")
        .map(|(i, _)| i)
        .collect();
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(keep.iter().map(|&i| &headers[i]))
        .unwrap();
    for record in reader.records() {
        let record = record.unwrap();
        writer
            .write_record(keep.iter().map(|&i| &record[i]))
            .unwrap();
    }
    std::fs::write(&manifest_path, writer.into_inner().unwrap()).unwrap();

    let reloaded = Baseline::load(tmp.path(), None).unwrap();
    assert_eq!(reloaded.num_models(), ensemble.num_models());
    assert!(reloaded
        .manifest()
        .iter()
        .all(|r| r.artifact_sha256.is_empty() && r.trained_at.is_none()));
}

#[test]
fn test_manifest_name_escaping_directory_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let models_dir = tmp.path().join("models");
    let ensemble = saved_ensemble(&models_dir);
    let first = ensemble.manifest().rows()[0].name.to_string();

    // move the artifact next to the ensemble directory and point the row at it
    std::fs::rename(
        models_dir.join(format!("{first}.bin")),
        tmp.path().join("outside.bin"),
    )
    .unwrap();
    let manifest_path = models_dir.join(MANIFEST_FILE);
    let text = std::fs::read_to_string(&manifest_path).unwrap();
    std::fs::write(&manifest_path, text.replace(&first, "../outside")).unwrap();

    assert!(matches!(
        Baseline::load(&models_dir, None),
        Err(EnsembleError::InvalidManifest(_))
    ));
}
