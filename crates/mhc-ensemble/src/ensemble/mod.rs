//! Ensemble coordinator.
//!
//! Owns allele-specific and pan-allele sub-models, drives batch training,
//! and keeps the manifest and the live model handles in lock step: a model
//! is registered (manifest row, partition entry and handle) in one step, so
//! `manifest().len() == num_models()` at every observable point.

mod parallel;
mod persist;
mod predict;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::domain::error::{EnsembleError, Result};
use crate::domain::{
    Allele, AlleleNormalizer, Hyperparameters, ModelName, ModelRecord, ModelScope,
    StandardAlleleNormalizer, PAN_ALLELE_LABEL,
};
use crate::manifest::Manifest;
use crate::metrics::METRICS;
use crate::obs::{emit_fit_failed, emit_model_trained, FitSpan};
use crate::predictor::{EncodableSequences, TrainablePredictor};

pub use predict::{ModelColumn, PredictOptions, PredictionTable};

/// Output assignment used when the caller does not supply one.
pub const DEFAULT_OUTPUT_ASSIGNMENT: &str = "output";

/// Per-call options for the fit methods.
#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    /// Row-aligned output names; defaults to [`DEFAULT_OUTPUT_ASSIGNMENT`].
    pub output_assignments: Option<Vec<String>>,
    /// Save each model (and the manifest) here right after it is fit.
    pub persist_dir: Option<PathBuf>,
    /// Provenance tag recorded in the manifest `sources` column.
    pub sources: Option<String>,
}

impl FitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_assignments(mut self, assignments: Vec<String>) -> Self {
        self.output_assignments = Some(assignments);
        self
    }

    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    pub fn with_sources(mut self, sources: impl Into<String>) -> Self {
        self.sources = Some(sources.into());
        self
    }
}

/// Validated training data shared by every sub-model of one fit call.
pub(crate) struct FitBatch {
    scope: ModelScope,
    peptides: EncodableSequences,
    affinities: Vec<f64>,
    output_assignments: Vec<String>,
    pseudosequences: Option<Vec<String>>,
}

/// Build and fit one predictor on `batch`.
pub(crate) fn train_one<P: TrainablePredictor>(
    hyperparameters: &Hyperparameters,
    batch: &FitBatch,
) -> Result<P> {
    let mut model = P::from_hyperparameters(hyperparameters)?;
    model.fit(
        &batch.peptides,
        &batch.affinities,
        &batch.output_assignments,
        batch.pseudosequences.as_deref(),
    )?;
    Ok(model)
}

/// Collection of allele-specific and pan-allele predictors plus their manifest.
pub struct Ensemble<P: TrainablePredictor> {
    allele_specific: BTreeMap<Allele, Vec<ModelName>>,
    pan_allele: Vec<ModelName>,
    pseudosequences: BTreeMap<Allele, String>,
    manifest: Manifest,
    models: HashMap<ModelName, P>,
    normalizer: Arc<dyn AlleleNormalizer>,
}

impl<P: TrainablePredictor> Default for Ensemble<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: TrainablePredictor> fmt::Debug for Ensemble<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ensemble")
            .field("allele_specific", &self.allele_specific)
            .field("pan_allele", &self.pan_allele)
            .field("pseudosequences", &self.pseudosequences.len())
            .field("manifest_rows", &self.manifest.len())
            .finish()
    }
}

impl<P: TrainablePredictor> Ensemble<P> {
    /// Empty ensemble without pseudosequences (allele-specific models only).
    pub fn new() -> Self {
        Self::with_normalizer(Arc::new(StandardAlleleNormalizer))
    }

    /// Empty ensemble using a custom allele normalizer.
    pub fn with_normalizer(normalizer: Arc<dyn AlleleNormalizer>) -> Self {
        Self {
            allele_specific: BTreeMap::new(),
            pan_allele: Vec::new(),
            pseudosequences: BTreeMap::new(),
            manifest: Manifest::new(),
            models: HashMap::new(),
            normalizer,
        }
    }

    /// Empty ensemble able to train pan-allele models. The table must not be
    /// empty.
    pub fn with_pseudosequences<I, K, V>(pseudosequences: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut ensemble = Self::new();
        ensemble.extend_pseudosequences(pseudosequences)?;
        if ensemble.pseudosequences.is_empty() {
            return Err(EnsembleError::MissingPseudosequences);
        }
        Ok(ensemble)
    }

    /// Add or replace allele → pseudosequence entries (keys are normalized).
    pub fn extend_pseudosequences<I, K, V>(&mut self, pseudosequences: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut normalized = Vec::new();
        for (allele, pseudosequence) in pseudosequences {
            normalized.push((self.normalizer.normalize(allele.as_ref())?, pseudosequence.into()));
        }
        self.pseudosequences.extend(normalized);
        Ok(())
    }

    pub fn normalize_allele(&self, raw: &str) -> Result<Allele> {
        self.normalizer.normalize(raw)
    }

    /// Train `n_models` predictors for one allele on the same data.
    ///
    /// Each model is registered before the next one starts; with
    /// `options.persist_dir` it is also saved before the next one starts.
    /// If a fit fails, the models trained so far stay registered and the
    /// error is returned.
    pub fn fit_allele_specific<S: AsRef<str>>(
        &mut self,
        n_models: usize,
        hyperparameters: &Hyperparameters,
        allele: &str,
        peptides: &[S],
        affinities: &[f64],
        options: FitOptions,
    ) -> Result<Vec<ModelName>> {
        let batch = self.prepare_allele_specific(allele, peptides, affinities, &options)?;
        self.fit_batch(n_models, hyperparameters, batch, &options)
    }

    /// Train `n_models` pan-allele predictors using each row's allele
    /// pseudosequence. Fails before training if any allele has none.
    pub fn fit_pan_allele<S: AsRef<str>, A: AsRef<str>>(
        &mut self,
        n_models: usize,
        hyperparameters: &Hyperparameters,
        alleles: &[A],
        peptides: &[S],
        affinities: &[f64],
        options: FitOptions,
    ) -> Result<Vec<ModelName>> {
        let batch = self.prepare_pan_allele(alleles, peptides, affinities, &options)?;
        self.fit_batch(n_models, hyperparameters, batch, &options)
    }

    pub(crate) fn prepare_allele_specific<S: AsRef<str>>(
        &self,
        allele: &str,
        peptides: &[S],
        affinities: &[f64],
        options: &FitOptions,
    ) -> Result<FitBatch> {
        let allele = self.normalizer.normalize(allele)?;
        if allele.as_str() == PAN_ALLELE_LABEL {
            return Err(EnsembleError::InvalidAllele(format!(
                "{PAN_ALLELE_LABEL} is reserved for pan-allele models"
            )));
        }
        let (peptides, output_assignments) = validate_training_rows(peptides, affinities, options)?;
        Ok(FitBatch {
            scope: ModelScope::AlleleSpecific(allele),
            peptides,
            affinities: affinities.to_vec(),
            output_assignments,
            pseudosequences: None,
        })
    }

    pub(crate) fn prepare_pan_allele<S: AsRef<str>, A: AsRef<str>>(
        &self,
        alleles: &[A],
        peptides: &[S],
        affinities: &[f64],
        options: &FitOptions,
    ) -> Result<FitBatch> {
        if alleles.len() != peptides.len() {
            return Err(EnsembleError::InvalidInput(format!(
                "{} alleles for {} peptides",
                alleles.len(),
                peptides.len()
            )));
        }
        let normalized = alleles
            .iter()
            .map(|a| self.normalizer.normalize(a.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let pseudosequences = self.resolve_pseudosequences(&normalized)?;
        let (peptides, output_assignments) = validate_training_rows(peptides, affinities, options)?;
        Ok(FitBatch {
            scope: ModelScope::PanAllele,
            peptides,
            affinities: affinities.to_vec(),
            output_assignments,
            pseudosequences: Some(pseudosequences),
        })
    }

    /// Row-aligned pseudosequences, or every allele that has none.
    pub(crate) fn resolve_pseudosequences(&self, alleles: &[Allele]) -> Result<Vec<String>> {
        let missing: BTreeSet<&Allele> = alleles
            .iter()
            .filter(|a| !self.pseudosequences.contains_key(*a))
            .collect();
        if !missing.is_empty() {
            return Err(EnsembleError::UnresolvablePseudosequences {
                alleles: missing.into_iter().map(|a| a.to_string()).collect(),
            });
        }
        Ok(alleles
            .iter()
            .filter_map(|a| self.pseudosequences.get(a).cloned())
            .collect())
    }

    fn fit_batch(
        &mut self,
        n_models: usize,
        hyperparameters: &Hyperparameters,
        batch: FitBatch,
        options: &FitOptions,
    ) -> Result<Vec<ModelName>> {
        let label = batch.scope.label().to_string();
        let _span = FitSpan::enter(&label, n_models);

        let mut names = Vec::with_capacity(n_models);
        for index in 0..n_models {
            let name = ModelName::generate(&batch.scope, index);
            tracing::debug!(model = %name, "training model {} / {}", index + 1, n_models);
            let model = match train_one::<P>(hyperparameters, &batch) {
                Ok(model) => model,
                Err(e) => {
                    emit_fit_failed(&label, index, &e);
                    return Err(e);
                }
            };
            self.register(name.clone(), &batch, hyperparameters, model, options, index, n_models)?;
            names.push(name);
        }
        Ok(names)
    }

    /// Add a freshly fit model: manifest row, partition entry and handle.
    /// With `options.persist_dir` the model and the manifest are then saved.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn register(
        &mut self,
        name: ModelName,
        batch: &FitBatch,
        hyperparameters: &Hyperparameters,
        model: P,
        options: &FitOptions,
        index: usize,
        n_models: usize,
    ) -> Result<()> {
        let record = ModelRecord {
            name: name.clone(),
            scope: batch.scope.clone(),
            hyperparameters: hyperparameters.clone(),
            history: model.fit_history().clone(),
            num_measurements: batch.peptides.len(),
            random_negative_rate: hyperparameters.random_negative_rate(),
            sources: options.sources.clone(),
            fit_seconds: model.fit_seconds(),
            artifact_sha256: String::new(),
            trained_at: Some(Utc::now()),
        };
        self.manifest.push(record)?;

        match &batch.scope {
            ModelScope::AlleleSpecific(allele) => self
                .allele_specific
                .entry(allele.clone())
                .or_default()
                .push(name.clone()),
            ModelScope::PanAllele => self.pan_allele.push(name.clone()),
        }
        emit_model_trained(
            name.as_str(),
            batch.scope.label(),
            index,
            n_models,
            model.fit_seconds(),
            batch.peptides.len(),
        );
        self.models.insert(name.clone(), model);
        METRICS.inc_models_trained();

        if let Some(dir) = &options.persist_dir {
            self.save(dir, Some(std::slice::from_ref(&name)))?;
        }
        Ok(())
    }

    /// Fail unless the manifest and the live models describe the same set.
    pub(crate) fn ensure_in_sync(&self) -> Result<()> {
        let partitioned =
            self.pan_allele.len() + self.allele_specific.values().map(Vec::len).sum::<usize>();
        if self.manifest.len() != self.models.len() || partitioned != self.models.len() {
            return Err(EnsembleError::ManifestOutOfSync {
                manifest_rows: self.manifest.len(),
                live_models: self.models.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn handle(&self, name: &ModelName) -> Result<&P> {
        self.models
            .get(name)
            .ok_or_else(|| EnsembleError::ModelNotFound(name.to_string()))
    }

    /// Alleles with at least one allele-specific model, sorted.
    pub fn supported_alleles(&self) -> Vec<Allele> {
        self.allele_specific
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(allele, _)| allele.clone())
            .collect()
    }

    pub fn allele_specific_models(&self, allele: &Allele) -> &[ModelName] {
        self.allele_specific
            .get(allele)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn pan_allele_models(&self) -> &[ModelName] {
        &self.pan_allele
    }

    pub fn model(&self, name: &ModelName) -> Option<&P> {
        self.models.get(name)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn pseudosequences(&self) -> &BTreeMap<Allele, String> {
        &self.pseudosequences
    }

    pub fn num_models(&self) -> usize {
        self.models.len()
    }

    /// One-line summary, e.g.
    /// `2 pan-allele models, 3 pseudosequences, 4 allele-specific models: HLA-A0101 (2), HLA-A0201 (2)`.
    pub fn describe(&self) -> String {
        let specific: usize = self.allele_specific.values().map(Vec::len).sum();
        format!(
            "{} pan-allele models, {} pseudosequences, {} allele-specific models: {}",
            self.pan_allele.len(),
            self.pseudosequences.len(),
            specific,
            self.allele_summary()
        )
    }

    fn allele_summary(&self) -> String {
        self.allele_specific
            .iter()
            .map(|(allele, names)| format!("{} ({})", allele, names.len()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Check row counts and build the encoded peptides and output assignments.
fn validate_training_rows<S: AsRef<str>>(
    peptides: &[S],
    affinities: &[f64],
    options: &FitOptions,
) -> Result<(EncodableSequences, Vec<String>)> {
    if peptides.is_empty() {
        return Err(EnsembleError::InvalidInput("no training rows".to_string()));
    }
    if peptides.len() != affinities.len() {
        return Err(EnsembleError::InvalidInput(format!(
            "{} peptides but {} affinities",
            peptides.len(),
            affinities.len()
        )));
    }
    let output_assignments = match &options.output_assignments {
        Some(assignments) if assignments.len() != peptides.len() => {
            return Err(EnsembleError::InvalidInput(format!(
                "{} output assignments for {} peptides",
                assignments.len(),
                peptides.len()
            )));
        }
        Some(assignments) => assignments.clone(),
        None => vec![DEFAULT_OUTPUT_ASSIGNMENT.to_string(); peptides.len()],
    };
    Ok((EncodableSequences::create(peptides)?, output_assignments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::PositionalMeanPredictor;
    use std::collections::HashSet;

    fn dataset() -> (Vec<String>, Vec<f64>) {
        let peptides = ["SIINFEKLL", "GILGFVFTL", "NLVPMVATV", "AAAAAAAAA", "KKKKKKKKK"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        (peptides, vec![20.0, 35.0, 80.0, 20_000.0, 40_000.0])
    }

    #[test]
    fn test_three_models_share_allele_with_distinct_names() {
        let (peptides, affinities) = dataset();
        let mut ensemble = Ensemble::<PositionalMeanPredictor>::new();
        let names = ensemble
            .fit_allele_specific(
                3,
                &Hyperparameters::new(),
                "HLA-A*01:01",
                &peptides,
                &affinities,
                FitOptions::new(),
            )
            .unwrap();

        assert_eq!(names.len(), 3);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 3);
        assert_eq!(ensemble.manifest().len(), 3);
        assert_eq!(ensemble.num_models(), 3);
        for row in ensemble.manifest().iter() {
            assert_eq!(row.scope.label(), "HLA-A0101");
            assert_eq!(row.num_measurements, 5);
        }
        let supported: Vec<_> = ensemble
            .supported_alleles()
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(supported, vec!["HLA-A0101"]);
    }

    #[test]
    fn test_zero_models_is_noop() {
        let (peptides, affinities) = dataset();
        let mut ensemble = Ensemble::<PositionalMeanPredictor>::new();
        let names = ensemble
            .fit_allele_specific(
                0,
                &Hyperparameters::new(),
                "HLA-A0101",
                &peptides,
                &affinities,
                FitOptions::new(),
            )
            .unwrap();
        assert!(names.is_empty());
        assert!(ensemble.manifest().is_empty());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let (peptides, _) = dataset();
        let mut ensemble = Ensemble::<PositionalMeanPredictor>::new();
        let err = ensemble
            .fit_allele_specific(
                1,
                &Hyperparameters::new(),
                "HLA-A0101",
                &peptides,
                &[1.0, 2.0],
                FitOptions::new(),
            )
            .unwrap_err();
        assert!(matches!(err, EnsembleError::InvalidInput(_)));
        assert_eq!(ensemble.num_models(), 0);
    }

    #[test]
    fn test_pan_allele_missing_pseudosequence_fails_before_training() {
        let (peptides, affinities) = dataset();
        let mut ensemble =
            Ensemble::<PositionalMeanPredictor>::with_pseudosequences([("HLA-A*01:01", "YFAMYQE")])
                .unwrap();
        let alleles = ["HLA-A0101", "HLA-B0702", "HLA-A0101", "HLA-C0401", "HLA-B0702"];
        let err = ensemble
            .fit_pan_allele(
                2,
                &Hyperparameters::new(),
                &alleles,
                &peptides,
                &affinities,
                FitOptions::new(),
            )
            .unwrap_err();
        match err {
            EnsembleError::UnresolvablePseudosequences { alleles } => {
                assert_eq!(alleles, vec!["HLA-B0702", "HLA-C0401"]);
            }
            other => panic!("expected UnresolvablePseudosequences, got {other:?}"),
        }
        assert!(ensemble.manifest().is_empty());
        assert!(ensemble.pan_allele_models().is_empty());
    }

    #[test]
    fn test_pan_allele_rows_carry_scope() {
        let (peptides, affinities) = dataset();
        let mut ensemble = Ensemble::<PositionalMeanPredictor>::with_pseudosequences([
            ("HLA-A0101", "YFAMYQE"),
            ("HLA-B0702", "YYSEYRN"),
        ])
        .unwrap();
        let alleles = ["HLA-A0101", "HLA-B0702", "HLA-A0101", "HLA-B0702", "HLA-A0101"];
        ensemble
            .fit_pan_allele(
                2,
                &Hyperparameters::new(),
                &alleles,
                &peptides,
                &affinities,
                FitOptions::new().with_sources("unit-test"),
            )
            .unwrap();

        assert_eq!(ensemble.pan_allele_models().len(), 2);
        assert!(ensemble.supported_alleles().is_empty());
        for row in ensemble.manifest().iter() {
            assert_eq!(row.scope, ModelScope::PanAllele);
            assert_eq!(row.sources.as_deref(), Some("unit-test"));
            assert!(row.name.as_str().starts_with("pan-class1-"));
        }
    }

    #[test]
    fn test_pan_allele_label_rejected_as_allele() {
        let (peptides, affinities) = dataset();
        let mut ensemble = Ensemble::<PositionalMeanPredictor>::new();
        let err = ensemble
            .fit_allele_specific(
                1,
                &Hyperparameters::new(),
                PAN_ALLELE_LABEL,
                &peptides,
                &affinities,
                FitOptions::new(),
            )
            .unwrap_err();
        assert!(matches!(err, EnsembleError::InvalidAllele(_)));
        assert!(ensemble.manifest().is_empty());
        assert!(ensemble.supported_alleles().is_empty());
    }

    #[test]
    fn test_empty_pseudosequence_table_rejected() {
        let empty: Vec<(String, String)> = Vec::new();
        assert!(matches!(
            Ensemble::<PositionalMeanPredictor>::with_pseudosequences(empty),
            Err(EnsembleError::MissingPseudosequences)
        ));
    }

    #[test]
    fn test_failed_fit_keeps_manifest_consistent() {
        let (peptides, affinities) = dataset();
        let mut ensemble = Ensemble::<PositionalMeanPredictor>::new();
        ensemble
            .fit_allele_specific(
                1,
                &Hyperparameters::new(),
                "HLA-A0101",
                &peptides,
                &affinities,
                FitOptions::new(),
            )
            .unwrap();

        let bad = Hyperparameters::new().with("peptide_length", 0);
        assert!(ensemble
            .fit_allele_specific(2, &bad, "HLA-A0201", &peptides, &affinities, FitOptions::new())
            .is_err());
        assert_eq!(ensemble.manifest().len(), ensemble.num_models());
        assert_eq!(ensemble.num_models(), 1);
        assert!(ensemble.ensure_in_sync().is_ok());
    }

    #[test]
    fn test_describe_lists_alleles() {
        let (peptides, affinities) = dataset();
        let mut ensemble = Ensemble::<PositionalMeanPredictor>::new();
        for allele in ["HLA-A0201", "HLA-A0101"] {
            ensemble
                .fit_allele_specific(
                    2,
                    &Hyperparameters::new(),
                    allele,
                    &peptides,
                    &affinities,
                    FitOptions::new(),
                )
                .unwrap();
        }
        assert_eq!(
            ensemble.describe(),
            "0 pan-allele models, 0 pseudosequences, 4 allele-specific models: HLA-A0101 (2), HLA-A0201 (2)"
        );
    }
}
