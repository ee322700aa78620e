//! Append-only manifest of trained sub-models and its CSV form.
//!
//! The manifest only holds metadata. Model handles are kept by the ensemble
//! and joined to rows by [`ModelName`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{EnsembleError, Result};
use crate::domain::{Allele, AlleleNormalizer, FitHistory, Hyperparameters, ModelName, ModelRecord, ModelScope};

/// On-disk row. Column order is the field order.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestCsvRow {
    name: String,
    allele: String,
    hyperparameters: String,
    history: String,
    num_measurements: usize,
    random_negative_rate: f64,
    #[serde(default)]
    sources: String,
    fit_seconds: f64,
    #[serde(default)]
    artifact_sha256: String,
    #[serde(default)]
    trained_at: String,
}

impl ManifestCsvRow {
    fn from_record(record: &ModelRecord) -> Result<Self> {
        Ok(Self {
            name: record.name.to_string(),
            allele: record.scope.label().to_string(),
            hyperparameters: record.hyperparameters.to_json()?,
            history: record.history.to_json()?,
            num_measurements: record.num_measurements,
            random_negative_rate: record.random_negative_rate,
            sources: record.sources.clone().unwrap_or_default(),
            fit_seconds: record.fit_seconds,
            artifact_sha256: record.artifact_sha256.clone(),
            trained_at: record
                .trained_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        })
    }

    fn into_record(self) -> Result<ModelRecord> {
        if self.name.is_empty() {
            return Err(EnsembleError::InvalidManifest("row with empty name".to_string()));
        }
        let trained_at = if self.trained_at.is_empty() {
            None
        } else {
            Some(
                DateTime::parse_from_rfc3339(&self.trained_at)
                    .map_err(|e| {
                        EnsembleError::InvalidManifest(format!(
                            "bad trained_at for {}: {e}",
                            self.name
                        ))
                    })?
                    .with_timezone(&Utc),
            )
        };
        Ok(ModelRecord {
            scope: ModelScope::from_label(&self.allele),
            hyperparameters: Hyperparameters::from_json(&self.hyperparameters)?,
            history: FitHistory::from_json(&self.history)?,
            num_measurements: self.num_measurements,
            random_negative_rate: self.random_negative_rate,
            sources: Some(self.sources).filter(|s| !s.is_empty()),
            fit_seconds: self.fit_seconds,
            artifact_sha256: self.artifact_sha256,
            trained_at,
            name: ModelName::from_manifest(self.name)?,
        })
    }
}

/// Ordered table of [`ModelRecord`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    rows: Vec<ModelRecord>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row. Names must be unique.
    pub fn push(&mut self, record: ModelRecord) -> Result<()> {
        if self.get(&record.name).is_some() {
            return Err(EnsembleError::InvalidManifest(format!(
                "duplicate model name {}",
                record.name
            )));
        }
        self.rows.push(record);
        Ok(())
    }

    pub fn get(&self, name: &ModelName) -> Option<&ModelRecord> {
        self.rows.iter().find(|r| &r.name == name)
    }

    pub(crate) fn get_mut(&mut self, name: &ModelName) -> Option<&mut ModelRecord> {
        self.rows.iter_mut().find(|r| &r.name == name)
    }

    pub fn rows(&self) -> &[ModelRecord] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelRecord> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render the whole manifest as CSV with a header row.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if self.rows.is_empty() {
            writer.write_record([
                "name",
                "allele",
                "hyperparameters",
                "history",
                "num_measurements",
                "random_negative_rate",
                "sources",
                "fit_seconds",
                "artifact_sha256",
                "trained_at",
            ])?;
        }
        for record in &self.rows {
            writer.serialize(ManifestCsvRow::from_record(record)?)?;
        }
        writer
            .into_inner()
            .map_err(|e| EnsembleError::Io(e.into_error()))
    }

    /// Parse CSV produced by [`Manifest::to_csv_bytes`], keeping at most
    /// `max_rows` rows.
    pub fn from_csv_reader<R: std::io::Read>(reader: R, max_rows: Option<usize>) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let mut manifest = Manifest::new();
        let mut seen = HashSet::new();
        for row in csv_reader.deserialize::<ManifestCsvRow>() {
            if max_rows.is_some_and(|max| manifest.len() >= max) {
                break;
            }
            let record = row?.into_record()?;
            if !seen.insert(record.name.clone()) {
                return Err(EnsembleError::InvalidManifest(format!(
                    "duplicate model name {}",
                    record.name
                )));
            }
            manifest.rows.push(record);
        }
        Ok(manifest)
    }

    pub fn read(path: &Path, max_rows: Option<usize>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file, max_rows)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PseudosequenceRow {
    allele: String,
    pseudosequence: String,
}

/// Render an allele → pseudosequence table as CSV.
pub fn pseudosequences_to_csv_bytes(table: &BTreeMap<Allele, String>) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for (allele, pseudosequence) in table {
        writer.serialize(PseudosequenceRow {
            allele: allele.to_string(),
            pseudosequence: pseudosequence.clone(),
        })?;
    }
    writer
        .into_inner()
        .map_err(|e| EnsembleError::Io(e.into_error()))
}

/// Read an allele → pseudosequence table, normalizing allele names.
pub fn read_pseudosequences(
    path: &Path,
    normalizer: &dyn AlleleNormalizer,
) -> Result<BTreeMap<Allele, String>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut table = BTreeMap::new();
    for row in reader.deserialize::<PseudosequenceRow>() {
        let row = row?;
        table.insert(normalizer.normalize(&row.allele)?, row.pseudosequence);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StandardAlleleNormalizer;

    fn record(scope: ModelScope, index: usize) -> ModelRecord {
        let mut history = FitHistory::new();
        history.record("loss", 0.5);
        history.record("loss", 0.25);
        ModelRecord {
            name: ModelName::generate(&scope, index),
            scope,
            hyperparameters: Hyperparameters::new()
                .with("layer_sizes", serde_json::json!([16]))
                .with("activation", "tanh"),
            history,
            num_measurements: 50,
            random_negative_rate: 0.0,
            sources: Some("iedb-2024".to_string()),
            fit_seconds: 1.25,
            artifact_sha256: String::new(),
            trained_at: Some(Utc::now()),
        }
    }

    fn allele(name: &str) -> Allele {
        StandardAlleleNormalizer.normalize(name).unwrap()
    }

    #[test]
    fn test_csv_roundtrip_preserves_rows_and_scope() {
        let mut manifest = Manifest::new();
        manifest
            .push(record(ModelScope::AlleleSpecific(allele("HLA-A0101")), 0))
            .unwrap();
        manifest.push(record(ModelScope::PanAllele, 0)).unwrap();

        let bytes = manifest.to_csv_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with(
            "name,allele,hyperparameters,history,num_measurements,random_negative_rate,sources,fit_seconds,artifact_sha256,trained_at"
        ));
        assert!(text.contains("pan-class1"));

        let parsed = Manifest::from_csv_reader(bytes.as_slice(), None).unwrap();
        assert_eq!(parsed.len(), 2);
        for (a, b) in manifest.iter().zip(parsed.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.scope, b.scope);
            assert_eq!(a.hyperparameters, b.hyperparameters);
            assert_eq!(a.history, b.history);
            assert_eq!(a.sources, b.sources);
            assert_eq!(a.fit_seconds, b.fit_seconds);
        }
    }

    #[test]
    fn test_max_rows_caps_read() {
        let mut manifest = Manifest::new();
        for i in 0..4 {
            manifest.push(record(ModelScope::PanAllele, i)).unwrap();
        }
        let bytes = manifest.to_csv_bytes().unwrap();
        let parsed = Manifest::from_csv_reader(bytes.as_slice(), Some(2)).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.rows()[1].name, manifest.rows()[1].name);
    }

    #[test]
    fn test_empty_manifest_still_has_header() {
        let bytes = Manifest::new().to_csv_bytes().unwrap();
        let parsed = Manifest::from_csv_reader(bytes.as_slice(), None).unwrap();
        assert!(parsed.is_empty());
        assert!(String::from_utf8(bytes).unwrap().starts_with("name,allele"));
    }

    #[test]
    fn test_push_rejects_duplicate_name() {
        let mut manifest = Manifest::new();
        let row = record(ModelScope::PanAllele, 0);
        manifest.push(row.clone()).unwrap();
        assert!(manifest.push(row).is_err());
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn test_rejects_unparseable_hyperparameters() {
        let csv = "name,allele,hyperparameters,history,num_measurements,random_negative_rate,sources,fit_seconds\n\
                   m-0-abc,HLA-A0101,\"{'activation': 'tanh'}\",{},10,0.0,,1.0\n";
        assert!(Manifest::from_csv_reader(csv.as_bytes(), None).is_err());
    }

    #[test]
    fn test_reads_manifest_without_supplemental_columns() {
        let csv = "name,allele,hyperparameters,history,num_measurements,random_negative_rate,sources,fit_seconds\n\
                   m-0-abc,HLA-A0101,\"{\"\"activation\"\": \"\"tanh\"\"}\",{},10,0.0,,1.0\n";
        let manifest = Manifest::from_csv_reader(csv.as_bytes(), None).unwrap();
        let row = &manifest.rows()[0];
        assert_eq!(row.artifact_sha256, "");
        assert!(row.trained_at.is_none());
        assert!(row.sources.is_none());
        assert_eq!(
            row.hyperparameters.get("activation"),
            Some(&serde_json::json!("tanh"))
        );
    }

    #[test]
    fn test_pseudosequence_table_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pseudosequences.csv");
        let mut table = BTreeMap::new();
        table.insert(allele("HLA-A0101"), "YFAMYQENMAHTDANTLYIIYRDYTWVARVYRGY".to_string());
        table.insert(allele("HLA-B0702"), "YYSEYRNIYAQTDESNLYLSYDYYTWAERAYEWY".to_string());
        std::fs::write(&path, pseudosequences_to_csv_bytes(&table).unwrap()).unwrap();

        let parsed = read_pseudosequences(&path, &StandardAlleleNormalizer).unwrap();
        assert_eq!(parsed, table);
    }
}
