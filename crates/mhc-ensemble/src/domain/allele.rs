//! Allele identifiers, allele-name normalization and model scope.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{EnsembleError, Result};

/// Value written in the manifest `allele` column for pan-allele models.
pub const PAN_ALLELE_LABEL: &str = "pan-class1";

/// Canonical allele name. Only constructed through an [`AlleleNormalizer`]
/// or when reading names that were normalized before they were persisted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allele(String);

impl Allele {
    pub(crate) fn from_canonical(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which partition of the ensemble a sub-model belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelScope {
    AlleleSpecific(Allele),
    PanAllele,
}

impl ModelScope {
    /// Label used in the manifest `allele` column and as the model name prefix.
    pub fn label(&self) -> &str {
        match self {
            ModelScope::AlleleSpecific(allele) => allele.as_str(),
            ModelScope::PanAllele => PAN_ALLELE_LABEL,
        }
    }

    /// Inverse of [`ModelScope::label`].
    pub fn from_label(label: &str) -> Self {
        if label == PAN_ALLELE_LABEL {
            ModelScope::PanAllele
        } else {
            ModelScope::AlleleSpecific(Allele::from_canonical(label))
        }
    }

    pub fn allele(&self) -> Option<&Allele> {
        match self {
            ModelScope::AlleleSpecific(allele) => Some(allele),
            ModelScope::PanAllele => None,
        }
    }
}

impl fmt::Display for ModelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Maps raw allele names to canonical ones.
///
/// Implementations must be idempotent: normalizing an already-normalized
/// name returns it unchanged.
pub trait AlleleNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> Result<Allele>;
}

/// Normalizer for the common class I spellings.
///
/// `HLA-A*02:01`, `A*02:01`, `hla-a0201` all map to `HLA-A0201`. Names that
/// do not look like classical HLA class I alleles (e.g. `H-2-Kb`) are kept
/// verbatim after trimming.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardAlleleNormalizer;

fn hla_class1_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:HLA-?)?([ABCEFG])\*?(\d{2}):?(\d{2,3})$").expect("static pattern")
    })
}

fn passthrough_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9*:_\-]*$").expect("static pattern"))
}

impl AlleleNormalizer for StandardAlleleNormalizer {
    fn normalize(&self, raw: &str) -> Result<Allele> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EnsembleError::InvalidAllele("empty allele name".to_string()));
        }

        let upper = trimmed.to_ascii_uppercase();
        if let Some(caps) = hla_class1_pattern().captures(&upper) {
            return Ok(Allele(format!("HLA-{}{}{}", &caps[1], &caps[2], &caps[3])));
        }

        if passthrough_pattern().is_match(trimmed) {
            Ok(Allele(trimmed.to_string()))
        } else {
            Err(EnsembleError::InvalidAllele(trimmed.to_string()))
        }
    }
}
