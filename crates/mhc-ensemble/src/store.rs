//! Filesystem layout of a persisted ensemble.
//!
//! Layout: `<root>/manifest.csv`, `<root>/<model name>.bin`, and optionally
//! `<root>/pseudosequences.csv`. Every write goes to a temp file in the
//! same directory and is renamed into place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::domain::error::{EnsembleError, Result};
use crate::domain::ModelName;

pub const MANIFEST_FILE: &str = "manifest.csv";
pub const PSEUDOSEQUENCES_FILE: &str = "pseudosequences.csv";

/// Lowercase hex SHA-256 of an artifact.
pub fn artifact_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Directory holding one ensemble.
#[derive(Debug, Clone)]
pub struct EnsembleDir {
    root: PathBuf,
}

impl EnsembleDir {
    /// Open `root` for writing, creating it if needed.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    /// Open an existing directory for reading.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(EnsembleError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("ensemble directory not found: {}", root.display()),
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn pseudosequences_path(&self) -> PathBuf {
        self.root.join(PSEUDOSEQUENCES_FILE)
    }

    pub fn artifact_path(&self, name: &ModelName) -> PathBuf {
        self.root.join(name.artifact_file_name())
    }

    pub fn write_artifact(&self, name: &ModelName, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.artifact_path(name);
        self.write_atomic(&path, bytes)?;
        Ok(path)
    }

    pub fn read_artifact(&self, name: &ModelName) -> Result<Vec<u8>> {
        let path = self.artifact_path(name);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EnsembleError::MissingArtifact {
                    name: name.to_string(),
                    path,
                }
            } else {
                EnsembleError::Io(e)
            }
        })
    }

    /// Replace `path` with `bytes` in one rename.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
