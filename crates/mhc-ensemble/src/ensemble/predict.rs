use std::collections::HashMap;
use std::io::Write;

use serde::Serialize;

use crate::domain::error::{EnsembleError, Result};
use crate::domain::{Allele, ModelName};
use crate::metrics::METRICS;
use crate::obs::emit_prediction;
use crate::predictor::{EncodableSequences, TrainablePredictor};

use super::Ensemble;

/// What to include in a [`PredictionTable`] besides per-model columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictOptions {
    pub include_mean: bool,
    pub include_peptides_and_alleles: bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            include_mean: true,
            include_peptides_and_alleles: true,
        }
    }
}

/// Predictions of one sub-model, aligned to the input rows. Rows the model
/// did not score are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelColumn {
    pub model: ModelName,
    pub values: Vec<Option<f64>>,
}

/// Row-aligned prediction output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionTable {
    rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    mean: Option<Vec<Option<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alleles: Option<Vec<Allele>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    peptides: Option<Vec<String>>,
    models: Vec<ModelColumn>,
}

impl PredictionTable {
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Geometric mean per row; `None` inside for rows no model scored.
    pub fn mean(&self) -> Option<&[Option<f64>]> {
        self.mean.as_deref()
    }

    pub fn alleles(&self) -> Option<&[Allele]> {
        self.alleles.as_deref()
    }

    pub fn peptides(&self) -> Option<&[String]> {
        self.peptides.as_deref()
    }

    pub fn model_columns(&self) -> &[ModelColumn] {
        &self.models
    }

    /// Column headers in output order.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.models.len() + 3);
        if self.mean.is_some() {
            names.push("mean".to_string());
        }
        if self.alleles.is_some() {
            names.push("allele".to_string());
            names.push("peptide".to_string());
        }
        names.extend(self.models.iter().map(|c| c.model.to_string()));
        names
    }

    /// Numeric column by name (`mean` or a model name).
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        if name == "mean" {
            return self.mean();
        }
        self.models
            .iter()
            .find(|c| c.model.as_str() == name)
            .map(|c| c.values.as_slice())
    }

    /// Write the table as CSV. Missing values are empty cells.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(self.column_names())?;
        for row in 0..self.rows {
            let mut record: Vec<String> = Vec::with_capacity(self.models.len() + 3);
            if let Some(mean) = &self.mean {
                record.push(format_cell(mean[row]));
            }
            if let (Some(alleles), Some(peptides)) = (&self.alleles, &self.peptides) {
                record.push(alleles[row].to_string());
                record.push(peptides[row].clone());
            }
            record.extend(self.models.iter().map(|c| format_cell(c.values[row])));
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

fn format_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Geometric mean of strictly positive values; `None` when empty.
pub(crate) fn geometric_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
    Some((log_sum / values.len() as f64).exp())
}

impl<P: TrainablePredictor> Ensemble<P> {
    /// Predict affinities for `peptides` paired row-wise with `alleles`.
    ///
    /// Pan-allele models score every row; allele-specific models score only
    /// the rows of their allele. Rows whose allele has no model and no
    /// pan-allele model exists get a `None` mean.
    pub fn predict<S: AsRef<str>, A: AsRef<str>>(
        &self,
        peptides: &[S],
        alleles: &[A],
        options: PredictOptions,
    ) -> Result<PredictionTable> {
        if peptides.len() != alleles.len() {
            return Err(EnsembleError::InvalidInput(format!(
                "{} peptides but {} alleles",
                peptides.len(),
                alleles.len()
            )));
        }
        let n_rows = peptides.len();
        let encoded = EncodableSequences::create(peptides)?;
        let normalized = alleles
            .iter()
            .map(|a| self.normalizer.normalize(a.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut columns: Vec<ModelColumn> = Vec::new();

        if !self.pan_allele.is_empty() {
            let pseudosequences = self.resolve_pseudosequences(&normalized)?;
            let all_rows: Vec<usize> = (0..n_rows).collect();
            for name in &self.pan_allele {
                let values = self
                    .handle(name)?
                    .predict(&encoded, Some(&pseudosequences))?;
                columns.push(scatter(name, &values, &all_rows, n_rows)?);
            }
        }

        for (allele, rows) in group_rows_by_allele(&normalized) {
            let names = self.allele_specific_models(&allele);
            if names.is_empty() {
                tracing::debug!(allele = %allele, rows = rows.len(), "no allele-specific models");
                continue;
            }
            let subset = encoded.select(&rows);
            for name in names {
                let values = self.handle(name)?.predict(&subset, None)?;
                columns.push(scatter(name, &values, &rows, n_rows)?);
            }
        }

        let mut rows_without_models = 0;
        let mut mean = Vec::with_capacity(n_rows);
        let mut contributions = Vec::with_capacity(columns.len());
        for row in 0..n_rows {
            contributions.clear();
            contributions.extend(columns.iter().filter_map(|c| c.values[row]));
            let row_mean = geometric_mean(&contributions);
            if row_mean.is_none() {
                rows_without_models += 1;
            }
            mean.push(row_mean);
        }

        emit_prediction(n_rows, columns.len(), rows_without_models);
        METRICS.add_rows_predicted(n_rows as u64);

        let (alleles, peptides) = if options.include_peptides_and_alleles {
            (
                Some(normalized),
                Some(peptides.iter().map(|p| p.as_ref().to_string()).collect()),
            )
        } else {
            (None, None)
        };
        Ok(PredictionTable {
            rows: n_rows,
            mean: options.include_mean.then_some(mean),
            alleles,
            peptides,
            models: columns,
        })
    }
}

/// Distinct alleles in first-appearance order with their row indices.
fn group_rows_by_allele(alleles: &[Allele]) -> Vec<(Allele, Vec<usize>)> {
    let mut groups: Vec<(Allele, Vec<usize>)> = Vec::new();
    let mut positions: HashMap<&Allele, usize> = HashMap::new();
    for (row, allele) in alleles.iter().enumerate() {
        let slot = *positions.entry(allele).or_insert_with(|| {
            groups.push((allele.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row);
    }
    groups
}

/// Place one model's outputs at their original row indices.
fn scatter(name: &ModelName, values: &[f64], rows: &[usize], n_rows: usize) -> Result<ModelColumn> {
    if values.len() != rows.len() {
        return Err(EnsembleError::AggregationFault {
            expected: rows.len(),
            actual: values.len(),
        });
    }
    let mut column = vec![None; n_rows];
    for (&row, &value) in rows.iter().zip(values) {
        if !(value.is_finite() && value > 0.0) {
            return Err(EnsembleError::NonPositivePrediction {
                model: name.to_string(),
                value,
            });
        }
        column[row] = Some(value);
    }
    Ok(ModelColumn {
        model: name.clone(),
        values: column,
    })
}
