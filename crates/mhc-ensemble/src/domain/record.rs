//! Manifest rows and unique model names.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use regex::Regex;
use uuid::Uuid;

use super::allele::ModelScope;
use super::error::{EnsembleError, Result};
use super::hyperparameters::{FitHistory, Hyperparameters};

/// Storage key of a sub-model: `<scope label>-<index>-<random token>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelName(String);

impl ModelName {
    /// Generate a fresh name. The 16-hex-char token comes from a UUIDv4, so
    /// repeated calls with the same scope and index never collide.
    pub fn generate(scope: &ModelScope, index: usize) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}-{}",
            sanitize_label(scope.label()),
            index,
            &token[..16]
        ))
    }

    /// Name read back from a manifest. Only the characters [`ModelName::generate`]
    /// produces are accepted, since the name becomes an artifact path component.
    pub(crate) fn from_manifest(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !name_pattern().is_match(&name) {
            return Err(EnsembleError::InvalidManifest(format!(
                "invalid model name {name:?}"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the model artifact.
    pub fn artifact_file_name(&self) -> String {
        format!("{}.bin", self.0)
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern"))
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Metadata for one trained sub-model. The model itself lives in the
/// ensemble's handle map under the same name.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRecord {
    pub name: ModelName,
    pub scope: ModelScope,
    pub hyperparameters: Hyperparameters,
    pub history: FitHistory,
    pub num_measurements: usize,
    pub random_negative_rate: f64,
    /// Provenance tag supplied by the caller (dataset name, pipeline run).
    pub sources: Option<String>,
    pub fit_seconds: f64,
    /// SHA-256 of the serialized model, empty for rows written without one.
    pub artifact_sha256: String,
    pub trained_at: Option<DateTime<Utc>>,
}
