//! Per-artifact metadata receipts.
//!
//! A receipt is a small JSON file written next to the cache after every
//! successful sync. It is the fast-path source of truth: checking one tiny
//! file per artifact is cheaper than consulting the shared cache store, and
//! receipts are naturally partitioned by artifact so concurrent writers
//! never contend.
//!
//! The schema is a stable contract; other tooling may read receipts to make
//! its own fast-skip decisions.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{ArtifactId, Integrity};

/// Errors that can occur reading or writing receipts.
#[derive(Debug, Error)]
pub enum ReceiptError {
    /// Failed to read or write a receipt file.
    #[error("receipt I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Receipt file exists but does not parse.
    #[error("malformed receipt {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One receipt record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataReceipt {
    /// Registry name of the artifact.
    pub name: String,
    /// Ecosystem label (`crate`, `npm`, `repo`, `gist`).
    pub kind: String,
    /// Version or commit the artifact was synced at.
    pub version: String,
    /// Integrity value recorded at sync time.
    pub integrity: Integrity,
    /// RFC 3339 timestamp of the last successful sync.
    pub last_updated: String,
    /// Canonical on-disk location of the artifact.
    pub canonical_path: PathBuf,
}

impl MetadataReceipt {
    /// Build a receipt for an artifact synced just now.
    pub fn now(id: &ArtifactId, version: &str, integrity: Integrity, path: &Path) -> Self {
        Self {
            name: id.name.clone(),
            kind: id.kind.label().to_string(),
            version: version.to_string(),
            integrity,
            last_updated: Utc::now().to_rfc3339(),
            canonical_path: path.to_path_buf(),
        }
    }

    /// Whether this receipt confirms the given remote state.
    pub fn matches(&self, version: &str, integrity: &Integrity) -> bool {
        self.version == version && &self.integrity == integrity
    }
}

/// Directory of receipt files, one per artifact.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    /// Create a receipt store rooted at `dir`. The directory is created
    /// lazily on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the receipt file for an artifact.
    pub fn path_for(&self, id: &ArtifactId) -> PathBuf {
        self.dir
            .join(format!("{}-{}.json", id.kind, id.safe_name()))
    }

    /// Load the receipt for an artifact, if one exists.
    ///
    /// A missing file is `Ok(None)`; a file that exists but does not parse
    /// is an error so corruption is noticed rather than silently re-fetched.
    pub fn load(&self, id: &ArtifactId) -> Result<Option<MetadataReceipt>, ReceiptError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).map_err(|e| ReceiptError::Io {
            path: path.clone(),
            source: e,
        })?;
        let receipt =
            serde_json::from_str(&contents).map_err(|e| ReceiptError::Malformed { path, source: e })?;
        Ok(Some(receipt))
    }

    /// Write (or overwrite) the receipt for an artifact.
    pub fn write(&self, id: &ArtifactId, receipt: &MetadataReceipt) -> Result<(), ReceiptError> {
        fs::create_dir_all(&self.dir).map_err(|e| ReceiptError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let path = self.path_for(id);
        let json = serde_json::to_string_pretty(receipt).map_err(|e| ReceiptError::Malformed {
            path: path.clone(),
            source: e,
        })?;
        fs::write(&path, json).map_err(|e| ReceiptError::Io { path, source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use std::fs;
    use tempfile::TempDir;

    fn id() -> ArtifactId {
        ArtifactId::new(ArtifactKind::Npm, "@scope/pkg")
    }

    #[test]
    fn test_write_then_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = ReceiptStore::new(temp.path().join("receipts"));
        let id = id();
        let receipt = MetadataReceipt::now(
            &id,
            "2.1.0",
            Integrity::Sha1("cafe".into()),
            Path::new("/cache/npm/pkg"),
        );

        store.write(&id, &receipt).unwrap();
        let loaded = store.load(&id).unwrap().unwrap();
        assert_eq!(loaded, receipt);
    }

    #[test]
    fn test_missing_receipt_is_none() {
        let temp = TempDir::new().unwrap();
        let store = ReceiptStore::new(temp.path().join("receipts"));
        assert!(store.load(&id()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_receipt_is_error() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("receipts");
        fs::create_dir_all(&dir).unwrap();
        let store = ReceiptStore::new(&dir);
        fs::write(store.path_for(&id()), "{not json").unwrap();

        assert!(store.load(&id()).is_err());
    }

    #[test]
    fn test_matches_requires_version_and_integrity() {
        let receipt = MetadataReceipt::now(
            &id(),
            "2.1.0",
            Integrity::Sha1("cafe".into()),
            Path::new("/p"),
        );
        assert!(receipt.matches("2.1.0", &Integrity::Sha1("cafe".into())));
        assert!(!receipt.matches("2.2.0", &Integrity::Sha1("cafe".into())));
        assert!(!receipt.matches("2.1.0", &Integrity::Sha1("beef".into())));
    }

    #[test]
    fn test_scoped_name_maps_to_safe_filename() {
        let temp = TempDir::new().unwrap();
        let store = ReceiptStore::new(temp.path());
        let path = store.path_for(&id());
        assert_eq!(path.file_name().unwrap(), "npm-_scope_pkg.json");
    }
}
