use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::domain::error::{EnsembleError, Result};
use crate::domain::{AlleleNormalizer, ModelName, ModelScope, StandardAlleleNormalizer};
use crate::manifest::{pseudosequences_to_csv_bytes, read_pseudosequences, Manifest};
use crate::metrics::METRICS;
use crate::obs::{emit_ensemble_loaded, emit_manifest_written, emit_model_saved};
use crate::predictor::TrainablePredictor;
use crate::store::{artifact_digest, EnsembleDir};

use super::Ensemble;

impl<P: TrainablePredictor> Ensemble<P> {
    /// Write model artifacts and the full manifest to `dir`.
    ///
    /// With `names_to_write = None` every model artifact is written; with a
    /// list only those artifacts are (re)written. The manifest is always
    /// rewritten in full, and `pseudosequences.csv` is written whenever the
    /// ensemble has a pseudosequence table.
    pub fn save(&mut self, dir: impl AsRef<Path>, names_to_write: Option<&[ModelName]>) -> Result<()> {
        self.ensure_in_sync()?;
        let store = EnsembleDir::create(dir)?;

        let names: Vec<ModelName> = match names_to_write {
            Some(names) => names.to_vec(),
            None => self.manifest.iter().map(|r| r.name.clone()).collect(),
        };

        let mut updated = self.manifest.clone();
        for name in &names {
            let row = updated
                .get_mut(name)
                .ok_or_else(|| EnsembleError::ModelNotFound(name.to_string()))?;
            let bytes = self.handle(name)?.to_artifact()?;
            let path = store.write_artifact(name, &bytes)?;
            row.artifact_sha256 = artifact_digest(&bytes);
            emit_model_saved(name.as_str(), &path, bytes.len());
            METRICS.inc_models_saved();
        }

        let manifest_path = store.manifest_path();
        store.write_atomic(&manifest_path, &updated.to_csv_bytes()?)?;
        emit_manifest_written(&manifest_path, updated.len());

        if !self.pseudosequences.is_empty() {
            store.write_atomic(
                &store.pseudosequences_path(),
                &pseudosequences_to_csv_bytes(&self.pseudosequences)?,
            )?;
        }

        self.manifest = updated;
        Ok(())
    }

    /// Load an ensemble previously written by [`Ensemble::save`].
    ///
    /// `max_models` keeps only the first N manifest rows.
    pub fn load(dir: impl AsRef<Path>, max_models: Option<usize>) -> Result<Self> {
        Self::load_with_normalizer(dir, max_models, Arc::new(StandardAlleleNormalizer))
    }

    pub fn load_with_normalizer(
        dir: impl AsRef<Path>,
        max_models: Option<usize>,
        normalizer: Arc<dyn AlleleNormalizer>,
    ) -> Result<Self> {
        let store = EnsembleDir::open(dir)?;
        let raw = Manifest::read(&store.manifest_path(), max_models)?;

        let mut manifest = Manifest::new();
        let mut models = HashMap::with_capacity(raw.len());
        let mut allele_specific: BTreeMap<_, Vec<ModelName>> = BTreeMap::new();
        let mut pan_allele = Vec::new();

        for mut record in raw.rows().iter().cloned() {
            if let ModelScope::AlleleSpecific(allele) = &record.scope {
                record.scope = ModelScope::AlleleSpecific(normalizer.normalize(allele.as_str())?);
            }
            let bytes = store.read_artifact(&record.name)?;
            if !record.artifact_sha256.is_empty() {
                let actual = artifact_digest(&bytes);
                if actual != record.artifact_sha256 {
                    return Err(EnsembleError::DigestMismatch {
                        name: record.name.to_string(),
                        expected: record.artifact_sha256.clone(),
                        actual,
                    });
                }
            }
            let model = P::from_artifact(&bytes)?;
            tracing::debug!(model = %record.name, scope = %record.scope, "loaded model");

            match &record.scope {
                ModelScope::AlleleSpecific(allele) => allele_specific
                    .entry(allele.clone())
                    .or_default()
                    .push(record.name.clone()),
                ModelScope::PanAllele => pan_allele.push(record.name.clone()),
            }
            models.insert(record.name.clone(), model);
            manifest.push(record)?;
        }

        let pseudosequences_path = store.pseudosequences_path();
        let pseudosequences = if pseudosequences_path.is_file() {
            read_pseudosequences(&pseudosequences_path, normalizer.as_ref())?
        } else {
            BTreeMap::new()
        };
        if !pan_allele.is_empty() && pseudosequences.is_empty() {
            return Err(EnsembleError::MissingPseudosequences);
        }

        let ensemble = Self {
            allele_specific,
            pan_allele,
            pseudosequences,
            manifest,
            models,
            normalizer,
        };
        ensemble.ensure_in_sync()?;

        METRICS.add_models_loaded(ensemble.num_models() as u64);
        emit_ensemble_loaded(
            store.root(),
            ensemble.pan_allele.len(),
            ensemble.pseudosequences.len(),
            ensemble.num_models() - ensemble.pan_allele.len(),
            &ensemble.allele_summary(),
        );
        Ok(ensemble)
    }
}
