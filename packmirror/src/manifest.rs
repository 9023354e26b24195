//! Manifest handling: the canonical worklist of artifacts to sync.
//!
//! A manifest file is newline-delimited UTF-8 artifact names, one per line,
//! sorted and deduplicated on write. Blank lines are ignored on read.
//! Merging the static manifest with discovery results is a set union
//! followed by a canonical sort, so `merge(a, b) == merge(b, a)` and
//! `merge(a, a) == dedupe(a)`. The merged result is persisted back as the
//! new static manifest, making discovery self-reinforcing across runs.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur reading or writing manifest files.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Failed to read the manifest file.
    #[error("failed to read manifest {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the manifest file.
    #[error("failed to write manifest {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A deduplicated, sorted set of artifact names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeSet<String>,
}

impl Manifest {
    /// Build a manifest from any iterator of names. Blank entries are
    /// dropped, surrounding whitespace trimmed.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { entries }
    }

    /// Load a manifest from a file. A missing file yields an empty manifest;
    /// other I/O failures are errors.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|e| ManifestError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::from_entries(contents.lines()))
    }

    /// Persist the manifest, sorted and deduplicated, one name per line.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ManifestError::WriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let mut contents = self
            .entries
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        fs::write(path, contents).map_err(|e| ManifestError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set union with another manifest; the result stays sorted.
    pub fn merge(&self, other: &Manifest) -> Manifest {
        let entries = self.entries.union(&other.entries).cloned().collect();
        Manifest { entries }
    }

    /// Iterate entries in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }
}
