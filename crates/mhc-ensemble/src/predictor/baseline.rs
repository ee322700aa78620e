//! Deterministic reference regressor.
//!
//! Affinities are mapped to `y = 1 - ln(ic50) / ln(max_ic50)` clipped to
//! `[0, 1]`. Each residue is assigned to one of `peptide_length`
//! length-normalized positions; the prediction is the mean of per-position
//! residue weights plus an optional per-pseudosequence offset. Weights and
//! offsets are fit by alternating smoothed means (one pass per epoch).

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::encoding::{residue_index, EncodableSequences, AMINO_ACIDS};
use super::{PredictorResult, TrainablePredictor};
use crate::domain::{FitHistory, Hyperparameters, PredictorError};

const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BaselineConfig {
    peptide_length: usize,
    regularization: f64,
    max_ic50: f64,
    n_training_epochs: usize,
}

impl BaselineConfig {
    fn from_hyperparameters(hp: &Hyperparameters) -> PredictorResult<Self> {
        let config = Self {
            peptide_length: hp.get_u64("peptide_length").unwrap_or(9) as usize,
            regularization: hp.get_f64("regularization").unwrap_or(1.0),
            max_ic50: hp.get_f64("max_ic50").unwrap_or(50_000.0),
            n_training_epochs: hp.get_u64("n_training_epochs").unwrap_or(3) as usize,
        };
        if config.peptide_length == 0 {
            return Err(PredictorError::InvalidHyperparameters(
                "peptide_length must be positive".to_string(),
            ));
        }
        if !(config.regularization >= 0.0) {
            return Err(PredictorError::InvalidHyperparameters(
                "regularization must be non-negative".to_string(),
            ));
        }
        if !(config.max_ic50 > 1.0) {
            return Err(PredictorError::InvalidHyperparameters(
                "max_ic50 must be greater than 1".to_string(),
            ));
        }
        if config.n_training_epochs == 0 {
            return Err(PredictorError::InvalidHyperparameters(
                "n_training_epochs must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Positional residue-mean regressor used as the default sub-model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionalMeanPredictor {
    version: u32,
    config: BaselineConfig,
    weights: Vec<Vec<f64>>,
    offsets: BTreeMap<String, f64>,
    global_mean: f64,
    fitted: bool,
    fit_seconds: f64,
    history: FitHistory,
}

impl PositionalMeanPredictor {
    fn to_unit(&self, ic50: f64) -> f64 {
        (1.0 - ic50.ln() / self.config.max_ic50.ln()).clamp(0.0, 1.0)
    }

    fn from_unit(&self, y: f64) -> f64 {
        self.config.max_ic50.powf(1.0 - y.clamp(0.0, 1.0))
    }

    fn position(&self, i: usize, len: usize) -> usize {
        (i * self.config.peptide_length / len).min(self.config.peptide_length - 1)
    }

    fn positional_score(&self, peptide: &str) -> f64 {
        let len = peptide.chars().count();
        let total: f64 = peptide
            .chars()
            .enumerate()
            .map(|(i, c)| self.weights[self.position(i, len)][residue_index(c)])
            .sum();
        total / len as f64
    }

    fn offset(&self, pseudosequences: Option<&[String]>, row: usize) -> f64 {
        pseudosequences
            .and_then(|p| self.offsets.get(&p[row]))
            .copied()
            .unwrap_or(0.0)
    }

    fn fit_weights(&mut self, sequences: &[String], residuals: &[f64]) {
        let reg = self.config.regularization;
        let prior = residuals.iter().sum::<f64>() / residuals.len() as f64;
        let mut sums = vec![vec![0.0; AMINO_ACIDS.len()]; self.config.peptide_length];
        let mut counts = vec![vec![0.0; AMINO_ACIDS.len()]; self.config.peptide_length];

        for (peptide, target) in sequences.iter().zip(residuals) {
            let len = peptide.chars().count();
            for (i, c) in peptide.chars().enumerate() {
                let pos = self.position(i, len);
                let aa = residue_index(c);
                sums[pos][aa] += target;
                counts[pos][aa] += 1.0;
            }
        }

        self.weights = sums
            .iter()
            .zip(&counts)
            .map(|(s_row, c_row)| {
                s_row
                    .iter()
                    .zip(c_row)
                    .map(|(s, c)| {
                        if *c + reg > 0.0 {
                            (s + reg * prior) / (c + reg)
                        } else {
                            prior
                        }
                    })
                    .collect()
            })
            .collect();
    }

    fn fit_offsets(&mut self, pseudosequences: &[String], residuals: &[f64]) {
        let reg = self.config.regularization;
        let mut acc: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        for (pseudo, r) in pseudosequences.iter().zip(residuals) {
            let entry = acc.entry(pseudo.clone()).or_insert((0.0, 0.0));
            entry.0 += r;
            entry.1 += 1.0;
        }
        self.offsets = acc
            .into_iter()
            .map(|(pseudo, (sum, count))| (pseudo, sum / (count + reg)))
            .collect();
    }
}

impl TrainablePredictor for PositionalMeanPredictor {
    fn from_hyperparameters(hyperparameters: &Hyperparameters) -> PredictorResult<Self> {
        let config = BaselineConfig::from_hyperparameters(hyperparameters)?;
        let weights = vec![vec![0.5; AMINO_ACIDS.len()]; config.peptide_length];
        Ok(Self {
            version: ARTIFACT_VERSION,
            config,
            weights,
            offsets: BTreeMap::new(),
            global_mean: 0.5,
            fitted: false,
            fit_seconds: 0.0,
            history: FitHistory::new(),
        })
    }

    fn fit(
        &mut self,
        peptides: &EncodableSequences,
        affinities: &[f64],
        output_assignments: &[String],
        pseudosequences: Option<&[String]>,
    ) -> PredictorResult<()> {
        let start = Instant::now();
        let n = peptides.len();
        if n == 0 {
            return Err(PredictorError::Fit("no training rows".to_string()));
        }
        if affinities.len() != n || output_assignments.len() != n {
            return Err(PredictorError::Fit(format!(
                "row mismatch: {} peptides, {} affinities, {} output assignments",
                n,
                affinities.len(),
                output_assignments.len()
            )));
        }
        if let Some(pseudos) = pseudosequences {
            if pseudos.len() != n {
                return Err(PredictorError::Fit(format!(
                    "row mismatch: {} peptides, {} pseudosequences",
                    n,
                    pseudos.len()
                )));
            }
        }
        if let Some(bad) = affinities.iter().find(|a| !(**a > 0.0) || !a.is_finite()) {
            return Err(PredictorError::Fit(format!(
                "affinities must be positive and finite, got {bad}"
            )));
        }

        let targets: Vec<f64> = affinities.iter().map(|a| self.to_unit(*a)).collect();
        self.global_mean = targets.iter().sum::<f64>() / n as f64;
        self.offsets.clear();
        self.history = FitHistory::new();

        let sequences = peptides.sequences();
        for _ in 0..self.config.n_training_epochs {
            let residuals: Vec<f64> = (0..n)
                .map(|row| targets[row] - self.offset(pseudosequences, row))
                .collect();
            self.fit_weights(sequences, &residuals);

            if let Some(pseudos) = pseudosequences {
                let residuals: Vec<f64> = (0..n)
                    .map(|row| targets[row] - self.positional_score(&sequences[row]))
                    .collect();
                self.fit_offsets(pseudos, &residuals);
            }

            let mse = (0..n)
                .map(|row| {
                    let y = (self.positional_score(&sequences[row])
                        + self.offset(pseudosequences, row))
                    .clamp(0.0, 1.0);
                    (y - targets[row]).powi(2)
                })
                .sum::<f64>()
                / n as f64;
            self.history.record("loss", mse);
        }

        self.fitted = true;
        self.fit_seconds = start.elapsed().as_secs_f64();
        Ok(())
    }

    fn predict(
        &self,
        peptides: &EncodableSequences,
        pseudosequences: Option<&[String]>,
    ) -> PredictorResult<Vec<f64>> {
        if !self.fitted {
            return Err(PredictorError::Predict("predictor has not been fit".to_string()));
        }
        if let Some(pseudos) = pseudosequences {
            if pseudos.len() != peptides.len() {
                return Err(PredictorError::Predict(format!(
                    "row mismatch: {} peptides, {} pseudosequences",
                    peptides.len(),
                    pseudos.len()
                )));
            }
        }
        Ok(peptides
            .sequences()
            .iter()
            .enumerate()
            .map(|(row, peptide)| {
                self.from_unit(self.positional_score(peptide) + self.offset(pseudosequences, row))
            })
            .collect())
    }

    fn fit_seconds(&self) -> f64 {
        self.fit_seconds
    }

    fn fit_history(&self) -> &FitHistory {
        &self.history
    }

    fn to_artifact(&self) -> PredictorResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PredictorError::Artifact(e.to_string()))
    }

    fn from_artifact(bytes: &[u8]) -> PredictorResult<Self> {
        let model: Self =
            serde_json::from_slice(bytes).map_err(|e| PredictorError::Artifact(e.to_string()))?;
        if model.version != ARTIFACT_VERSION {
            return Err(PredictorError::Artifact(format!(
                "unsupported artifact version {}",
                model.version
            )));
        }
        if model.config.peptide_length == 0 || model.weights.len() != model.config.peptide_length {
            return Err(PredictorError::Artifact(format!(
                "{} weight rows for peptide length {}",
                model.weights.len(),
                model.config.peptide_length
            )));
        }
        if let Some(row) = model.weights.iter().find(|r| r.len() != AMINO_ACIDS.len()) {
            return Err(PredictorError::Artifact(format!(
                "weight row has {} entries, expected {}",
                row.len(),
                AMINO_ACIDS.len()
            )));
        }
        Ok(model)
    }
}
