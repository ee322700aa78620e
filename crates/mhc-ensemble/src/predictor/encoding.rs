//! Minimal peptide encoding adapter.

use crate::domain::error::{EnsembleError, Result};

/// Residues accepted in peptides; `X` stands for an unknown residue.
pub const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWYX";

/// Batch of validated, upper-cased peptide sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodableSequences {
    sequences: Vec<String>,
}

impl EncodableSequences {
    pub fn create<S: AsRef<str>>(peptides: &[S]) -> Result<Self> {
        let mut sequences = Vec::with_capacity(peptides.len());
        for (row, raw) in peptides.iter().enumerate() {
            let peptide = raw.as_ref().trim().to_ascii_uppercase();
            if peptide.is_empty() {
                return Err(EnsembleError::InvalidInput(format!(
                    "empty peptide at row {row}"
                )));
            }
            if let Some(bad) = peptide.chars().find(|c| !AMINO_ACIDS.contains(*c)) {
                return Err(EnsembleError::InvalidInput(format!(
                    "peptide {peptide} at row {row} contains unsupported residue '{bad}'"
                )));
            }
            sequences.push(peptide);
        }
        Ok(Self { sequences })
    }

    /// Rows selected by `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            sequences: indices.iter().map(|&i| self.sequences[i].clone()).collect(),
        }
    }

    pub fn sequences(&self) -> &[String] {
        &self.sequences
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

/// Index of `residue` in [`AMINO_ACIDS`]; unknown residues map to `X`.
pub fn residue_index(residue: char) -> usize {
    AMINO_ACIDS
        .find(residue)
        .unwrap_or(AMINO_ACIDS.len() - 1)
}
