//! Structured hyperparameter sets and per-epoch training histories.
//!
//! Both are stored in the manifest as JSON text and parsed back with
//! `serde_json`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{EnsembleError, Result};

/// Key/value configuration handed to a predictor constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters(Map<String, Value>);

impl Hyperparameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Fraction of random negative peptides the predictor is asked to add.
    pub fn random_negative_rate(&self) -> f64 {
        self.get_f64("random_negative_rate").unwrap_or(0.0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Parse the manifest form. Anything other than a JSON object is rejected.
    pub fn from_json(text: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(EnsembleError::InvalidManifest(format!(
                "hyperparameters must be a JSON object, got {other}"
            ))),
        }
    }
}

impl From<Map<String, Value>> for Hyperparameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Per-epoch training metrics, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FitHistory(BTreeMap<String, Vec<f64>>);

impl FitHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one epoch's value for `metric`.
    pub fn record(&mut self, metric: &str, value: f64) {
        self.0.entry(metric.to_string()).or_default().push(value);
    }

    pub fn metric(&self, metric: &str) -> Option<&[f64]> {
        self.0.get(metric).map(Vec::as_slice)
    }

    /// Number of epochs recorded (longest metric series).
    pub fn epochs(&self) -> usize {
        self.0.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }
}
