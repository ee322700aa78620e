//! Concurrent training of the sub-models of one fit call.
//!
//! Fits run on tokio's blocking pool, at most `max_concurrent` at a time.
//! Names are fixed before dispatch and results are registered on the calling
//! task in index order, so manifest order and persistence writes match the
//! sequential path.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::ParallelFitConfig;
use crate::domain::error::Result;
use crate::domain::{Hyperparameters, ModelName};
use crate::obs::emit_fit_failed;
use crate::predictor::TrainablePredictor;

use super::{train_one, Ensemble, FitBatch, FitOptions};

type FitTask<P> = JoinHandle<std::result::Result<Result<P>, tokio::task::JoinError>>;

impl<P: TrainablePredictor> Ensemble<P> {
    /// Concurrent variant of [`Ensemble::fit_allele_specific`].
    #[allow(clippy::too_many_arguments)]
    pub async fn fit_allele_specific_parallel<S: AsRef<str>>(
        &mut self,
        n_models: usize,
        hyperparameters: &Hyperparameters,
        allele: &str,
        peptides: &[S],
        affinities: &[f64],
        options: FitOptions,
        config: &ParallelFitConfig,
    ) -> Result<Vec<ModelName>> {
        let batch = self.prepare_allele_specific(allele, peptides, affinities, &options)?;
        self.fit_batch_parallel(n_models, hyperparameters, batch, &options, config)
            .await
    }

    /// Concurrent variant of [`Ensemble::fit_pan_allele`].
    #[allow(clippy::too_many_arguments)]
    pub async fn fit_pan_allele_parallel<S: AsRef<str>, A: AsRef<str>>(
        &mut self,
        n_models: usize,
        hyperparameters: &Hyperparameters,
        alleles: &[A],
        peptides: &[S],
        affinities: &[f64],
        options: FitOptions,
        config: &ParallelFitConfig,
    ) -> Result<Vec<ModelName>> {
        let batch = self.prepare_pan_allele(alleles, peptides, affinities, &options)?;
        self.fit_batch_parallel(n_models, hyperparameters, batch, &options, config)
            .await
    }

    async fn fit_batch_parallel(
        &mut self,
        n_models: usize,
        hyperparameters: &Hyperparameters,
        batch: FitBatch,
        options: &FitOptions,
        config: &ParallelFitConfig,
    ) -> Result<Vec<ModelName>> {
        let label = batch.scope.label().to_string();
        let span = tracing::info_span!(
            "mhc_ensemble.fit",
            scope = %label,
            n_models = n_models,
            max_concurrent = config.max_concurrent
        );

        async move {
            let batch = Arc::new(batch);
            let shared_hyperparameters = Arc::new(hyperparameters.clone());
            let sem = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

            let mut tasks: Vec<(usize, ModelName, FitTask<P>)> = Vec::with_capacity(n_models);
            for index in 0..n_models {
                let name = ModelName::generate(&batch.scope, index);
                let batch = Arc::clone(&batch);
                let hyperparameters = Arc::clone(&shared_hyperparameters);
                let sem = Arc::clone(&sem);

                let task = tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.ok();
                    tokio::task::spawn_blocking(move || train_one::<P>(&hyperparameters, &batch))
                        .await
                });
                tasks.push((index, name, task));
            }

            let mut names = Vec::with_capacity(n_models);
            let mut pending = tasks.into_iter();
            while let Some((index, name, task)) = pending.next() {
                let outcome = match task.await {
                    Ok(Ok(fitted)) => fitted,
                    Ok(Err(join)) | Err(join) => Err(join.into()),
                };
                let committed = match outcome {
                    Ok(model) => self.register(
                        name.clone(),
                        &batch,
                        hyperparameters,
                        model,
                        options,
                        index,
                        n_models,
                    ),
                    Err(e) => {
                        emit_fit_failed(&label, index, &e);
                        Err(e)
                    }
                };
                if let Err(e) = committed {
                    for (_, _, rest) in pending.by_ref() {
                        rest.abort();
                    }
                    return Err(e);
                }
                names.push(name);
            }
            Ok(names)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::EnsembleError;
    use crate::predictor::PositionalMeanPredictor;

    const PEPTIDES: [&str; 4] = ["SIINFEKLL", "GILGFVFTL", "AAAAAAAAA", "KKKKKKKKK"];
    const AFFINITIES: [f64; 4] = [25.0, 40.0, 15_000.0, 30_000.0];

    #[tokio::test]
    async fn test_parallel_names_follow_index_order() {
        let mut ensemble = Ensemble::<PositionalMeanPredictor>::new();
        let config = ParallelFitConfig::default().with_max_concurrent(2);
        let names = ensemble
            .fit_allele_specific_parallel(
                4,
                &Hyperparameters::new(),
                "HLA-A0201",
                &PEPTIDES,
                &AFFINITIES,
                FitOptions::new(),
                &config,
            )
            .await
            .unwrap();

        assert_eq!(names.len(), 4);
        for (i, name) in names.iter().enumerate() {
            assert!(name.as_str().starts_with(&format!("HLA-A0201-{i}-")));
            assert_eq!(&ensemble.manifest().rows()[i].name, name);
        }
        assert_eq!(ensemble.num_models(), 4);
    }

    #[tokio::test]
    async fn test_parallel_failure_returns_error() {
        let mut ensemble = Ensemble::<PositionalMeanPredictor>::new();
        let bad = Hyperparameters::new().with("peptide_length", 0);
        let err = ensemble
            .fit_allele_specific_parallel(
                3,
                &bad,
                "HLA-A0201",
                &PEPTIDES,
                &AFFINITIES,
                FitOptions::new(),
                &ParallelFitConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EnsembleError::Predictor(_)));
        assert_eq!(ensemble.manifest().len(), ensemble.num_models());
        assert_eq!(ensemble.num_models(), 0);
    }
}
