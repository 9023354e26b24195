//! Persistent cache store mapping artifacts to verified local paths.
//!
//! The store is a pipe-delimited text file of records:
//!
//! ```text
//! # packmirror cache store v1
//! crate|serde|1.0.200|pending|/cache/artifacts/crate/serde/1.0.200/serde-1.0.200.crate|1717000000
//! ```
//!
//! Records are unique by `(kind, name, version)`. A lookup hits only on an
//! exact match of all four fields including integrity: if upstream content
//! mutated at the same declared version, the lookup must miss so the engine
//! re-fetches.
//!
//! # Concurrency
//!
//! All records live in memory behind a single mutex. Every mutation updates
//! the map and rewrites the file (write-temp, rename) while still holding
//! the lock, so concurrent upserts from parallel sync jobs serialize instead
//! of racing read-modify-write cycles against each other. A crash mid-write
//! leaves the previous file intact.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::artifact::{ArtifactKind, Integrity};

/// Header written to newly created store files.
const STORE_HEADER: &str = "# packmirror cache store v1";

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during cache store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read the store file.
    #[error("failed to read store {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to persist the store file.
    #[error("failed to write store {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record line in the store file could not be parsed.
    #[error("malformed store record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
}

/// One cached artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    /// Ecosystem of the artifact.
    pub kind: ArtifactKind,
    /// Registry name.
    pub name: String,
    /// Version or ref the artifact was fetched at.
    pub version: String,
    /// Integrity value recorded at commit time.
    pub integrity: Integrity,
    /// Where the artifact lives on disk.
    pub local_path: PathBuf,
    /// Unix timestamp of the last successful verification.
    pub last_verified_at: i64,
}

impl CacheRecord {
    fn key(&self) -> RecordKey {
        (self.kind, self.name.clone(), self.version.clone())
    }

    fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.kind,
            self.name,
            self.version,
            self.integrity,
            self.local_path.display(),
            self.last_verified_at
        )
    }

    fn parse_line(line: &str, line_no: usize) -> StoreResult<Self> {
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 6 {
            return Err(StoreError::MalformedRecord {
                line: line_no,
                reason: format!("expected 6 fields, got {}", fields.len()),
            });
        }
        let kind = fields[0]
            .parse::<ArtifactKind>()
            .map_err(|reason| StoreError::MalformedRecord { line: line_no, reason })?;
        let integrity = fields[3]
            .parse::<Integrity>()
            .map_err(|reason| StoreError::MalformedRecord { line: line_no, reason })?;
        let last_verified_at =
            fields[5]
                .parse::<i64>()
                .map_err(|e| StoreError::MalformedRecord {
                    line: line_no,
                    reason: format!("bad timestamp: {e}"),
                })?;
        Ok(Self {
            kind,
            name: fields[1].to_string(),
            version: fields[2].to_string(),
            integrity,
            local_path: PathBuf::from(fields[4]),
            last_verified_at,
        })
    }
}

type RecordKey = (ArtifactKind, String, String);

/// The shared cache store.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    /// Comment header preserved across rewrites.
    header: Vec<String>,
    records: HashMap<RecordKey, CacheRecord>,
}

impl CacheStore {
    /// Open a store file, creating an empty in-memory store if the file does
    /// not exist yet. The file itself is only created on the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let mut header = Vec::new();
        let mut records = HashMap::new();

        if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| StoreError::ReadFailed {
                path: path.clone(),
                source: e,
            })?;
            for (idx, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                if line.starts_with('#') {
                    header.push(line.to_string());
                    continue;
                }
                let record = CacheRecord::parse_line(line, idx + 1)?;
                records.insert(record.key(), record);
            }
        }
        if header.is_empty() {
            header.push(STORE_HEADER.to_string());
        }

        Ok(Self {
            path,
            inner: Mutex::new(StoreInner { header, records }),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a cached artifact.
    ///
    /// Returns a hit only on an exact match of kind, name, version **and**
    /// integrity. A changed integrity at the same version means upstream
    /// content mutated and must miss.
    pub fn lookup(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
        integrity: &Integrity,
    ) -> Option<PathBuf> {
        let inner = self.inner.lock();
        let record = inner
            .records
            .get(&(kind, name.to_string(), version.to_string()))?;
        if &record.integrity == integrity {
            Some(record.local_path.clone())
        } else {
            None
        }
    }

    /// Insert or replace the record for `(kind, name, version)` and persist.
    ///
    /// The file replace is atomic (write-temp, rename); the in-memory map
    /// and the file are updated under one lock acquisition.
    pub fn upsert(&self, record: CacheRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        debug!(artifact = %format!("{}/{}", record.kind, record.name), version = %record.version, "store upsert");
        inner.records.insert(record.key(), record);
        self.persist(&inner)
    }

    /// Drop records whose local path no longer exists.
    ///
    /// Content hashes are deliberately not re-verified here; this is a cheap
    /// liveness pass, not a full audit. Returns the number of pruned records.
    pub fn validate(&self) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner.records.retain(|_, r| r.local_path.exists());
        let pruned = before - inner.records.len();
        if pruned > 0 {
            debug!(pruned, "store validate pruned dead records");
            self.persist(&inner)?;
        }
        Ok(pruned)
    }

    /// Number of records currently in the store.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all records, sorted by key for stable output.
    pub fn records(&self) -> Vec<CacheRecord> {
        let inner = self.inner.lock();
        let mut records: Vec<_> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        records
    }

    /// Remove every record and persist the empty store.
    pub fn clear(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.records.clear();
        self.persist(&inner)
    }

    /// Rewrite the store file. Caller must hold the lock.
    fn persist(&self, inner: &StoreInner) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        let write = |path: &Path| -> std::io::Result<()> {
            let mut file = fs::File::create(path)?;
            for line in &inner.header {
                writeln!(file, "{line}")?;
            }
            let mut records: Vec<_> = inner.records.values().collect();
            records.sort_by_key(|r| r.key());
            for record in records {
                writeln!(file, "{}", record.to_line())?;
            }
            file.flush()
        };

        write(&tmp_path).map_err(|e| StoreError::WriteFailed {
            path: tmp_path.clone(),
            source: e,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(())
    }
}
