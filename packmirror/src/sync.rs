//! The incremental sync state machine.
//!
//! One [`SyncEngine::sync`] call takes a single artifact from resolution to
//! a terminal [`SyncOutcome`]:
//!
//! ```text
//! START -> RESOLVE_REMOTE -> CHECK_RECEIPT -> CHECK_CACHE
//!       -> CHECK_LOCAL_ARTIFACT -> FETCH -> VERIFY -> EXTRACT -> COMMIT
//! ```
//!
//! Checks are ordered cheapest-first so a fully synced manifest completes
//! without touching the network: the receipt is one small file read, the
//! cache lookup is an in-memory map probe. Skip decisions still re-verify
//! the local copy's content, so corruption of a cached artifact triggers a
//! re-fetch on the next run instead of being trusted forever. The commit
//! (receipt write + store upsert) happens strictly after extraction
//! succeeds, so an interrupted job can leave a partial artifact on disk but
//! never a store entry pointing at one.
//!
//! Skips never rewrite the store file; re-running an unchanged manifest
//! leaves it byte-identical.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactId, Integrity};
use crate::checksum::{ChecksumError, Verifier};
use crate::config::CacheLayout;
use crate::extract::{ArchiveExtractor, ExtractError};
use crate::receipt::{MetadataReceipt, ReceiptError, ReceiptStore};
use crate::source::{RegistrySource, SourceError};
use crate::store::{CacheRecord, CacheStore, StoreError};

/// Terminal result of syncing one artifact.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Receipt or cache confirmed the artifact is current; nothing touched.
    Skipped,
    /// A valid local copy existed but was unregistered; store and receipt
    /// were backfilled without fetching.
    SkippedReconciled,
    /// The artifact was downloaded, verified, and committed.
    Fetched,
    /// The sync failed; siblings are unaffected.
    Failed(SyncError),
}

impl SyncOutcome {
    /// Whether this outcome counts against the batch's failure total.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Short label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::SkippedReconciled => "reconciled",
            Self::Fetched => "fetched",
            Self::Failed(_) => "failed",
        }
    }
}

/// Errors terminating a single sync job.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The artifact does not exist upstream.
    #[error("no remote found for {name}")]
    RemoteNotFound { name: String },

    /// The fetched file did not match its expected integrity. The file has
    /// been moved to quarantine; the cache is untouched.
    #[error("integrity mismatch for {name}, expected {expected}, quarantined at {quarantined}")]
    IntegrityMismatch {
        name: String,
        expected: Integrity,
        quarantined: PathBuf,
    },

    /// A registry or download operation failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Unpacking the fetched archive failed.
    #[error(transparent)]
    Extraction(#[from] ExtractError),

    /// A digest could not be computed under the strict policy.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// Committing the record to the cache store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Writing the metadata receipt failed.
    #[error(transparent)]
    Receipt(#[from] ReceiptError),

    /// Moving a corrupt file aside failed; the file stays where it is.
    #[error("failed to quarantine {path}: {source}")]
    QuarantineFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The job was cancelled before it could commit.
    #[error("cancelled")]
    Cancelled,

    /// The job exceeded the configured per-job timeout.
    #[error("timed out after {secs}s")]
    TimedOut { secs: u64 },

    /// The job's worker terminated without producing an outcome.
    #[error("job terminated unexpectedly: {reason}")]
    Aborted { reason: String },
}

/// Drives one artifact through the sync state machine.
///
/// Shared across jobs behind an `Arc`; all methods take `&self` and the
/// store serializes its own writers.
pub struct SyncEngine {
    layout: CacheLayout,
    store: Arc<CacheStore>,
    receipts: ReceiptStore,
    verifier: Verifier,
    source: Arc<dyn RegistrySource>,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl SyncEngine {
    /// Create an engine over an opened store and a registry source.
    pub fn new(
        layout: CacheLayout,
        store: Arc<CacheStore>,
        source: Arc<dyn RegistrySource>,
        extractor: Arc<dyn ArchiveExtractor>,
        verifier: Verifier,
    ) -> Self {
        let receipts = ReceiptStore::new(layout.receipts_dir());
        Self {
            layout,
            store,
            receipts,
            verifier,
            source,
            extractor,
        }
    }

    /// Sync one artifact to its latest upstream state.
    ///
    /// `log` receives the job's verbose narration; the executor points it at
    /// a per-job file or a sink. All failure modes are folded into the
    /// returned [`SyncOutcome`] so one bad artifact never aborts a batch.
    pub fn sync(
        &self,
        id: &ArtifactId,
        cancel: &CancellationToken,
        log: &mut dyn Write,
    ) -> SyncOutcome {
        match self.run(id, cancel, log) {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = writeln!(log, "failed: {e}");
                SyncOutcome::Failed(e)
            }
        }
    }

    fn run(
        &self,
        id: &ArtifactId,
        cancel: &CancellationToken,
        log: &mut dyn Write,
    ) -> Result<SyncOutcome, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // RESOLVE_REMOTE
        let remote = match self.source.resolve_remote(&id.name) {
            Ok(remote) => remote,
            Err(SourceError::RemoteNotFound { name }) => {
                return Err(SyncError::RemoteNotFound { name })
            }
            Err(e) => return Err(e.into()),
        };
        let _ = writeln!(
            log,
            "resolved {id} to {} ({})",
            remote.version, remote.integrity
        );

        // CHECK_RECEIPT: one small file read confirms the common case. The
        // local copy is re-verified so silent corruption of a receipted
        // artifact is caught here rather than trusted forever.
        match self.receipts.load(id) {
            Ok(Some(receipt))
                if receipt.matches(&remote.version, &remote.integrity)
                    && self.local_copy_is_valid(&receipt.canonical_path, &remote.integrity) =>
            {
                debug!(artifact = %id, version = %remote.version, "receipt current, skipping");
                let _ = writeln!(log, "receipt current, skipping");
                return Ok(SyncOutcome::Skipped);
            }
            Ok(_) => {}
            Err(e) => {
                // A corrupt receipt is repaired by the sync itself.
                warn!(artifact = %id, error = %e, "unreadable receipt, re-syncing");
            }
        }

        // CHECK_CACHE: exact match on all four fields, and the copy on disk
        // must still verify.
        if let Some(path) =
            self.store
                .lookup(id.kind, &id.name, &remote.version, &remote.integrity)
        {
            if self.local_copy_is_valid(&path, &remote.integrity) {
                debug!(artifact = %id, version = %remote.version, "cache hit, skipping");
                let _ = writeln!(log, "cache hit at {}, skipping", path.display());
                // Backfill the receipt so the next run takes the fast path.
                self.write_receipt(id, &remote.version, remote.integrity.clone(), &path)?;
                return Ok(SyncOutcome::Skipped);
            }
        }

        let dest = self.layout.artifact_dest(id, &remote.version);

        // CHECK_LOCAL_ARTIFACT: an unregistered copy (from an interrupted
        // run, or a cache dir populated out-of-band) that passes
        // verification is adopted instead of re-fetched.
        if self.local_copy_is_valid(&dest, &remote.integrity) {
            info!(artifact = %id, version = %remote.version, "reconciled local artifact");
            let _ = writeln!(log, "valid local copy at {}, reconciling", dest.display());
            self.commit(id, &remote.version, remote.integrity.clone(), &dest, log)?;
            return Ok(SyncOutcome::SkippedReconciled);
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // FETCH
        let _ = writeln!(log, "fetching {id} {}", remote.version);
        self.source.fetch(&remote, &dest)?;

        // VERIFY: a mismatch moves the file to quarantine for inspection
        // and leaves the cache untouched.
        if !self.verifier.verify(&dest, &remote.integrity)? {
            let quarantined = self.quarantine(id, &remote.version, &dest)?;
            warn!(
                artifact = %id,
                expected = %remote.integrity,
                quarantined = %quarantined.display(),
                "integrity mismatch, quarantined"
            );
            let _ = writeln!(log, "integrity mismatch, quarantined at {}", quarantined.display());
            return Err(SyncError::IntegrityMismatch {
                name: id.name.clone(),
                expected: remote.integrity,
                quarantined,
            });
        }

        // EXTRACT: archives are unpacked next to the archive file; git
        // snapshots were placed directly by fetch.
        if id.kind.is_archive() {
            let contents = self.layout.contents_dir(id, &remote.version);
            let count = self.extractor.extract(&dest, &contents)?;
            let _ = writeln!(log, "extracted {count} entries to {}", contents.display());
        }

        // A job whose token tripped mid-flight (batch interrupt or timeout)
        // must stop here: the fetched artifact stays on disk for the next
        // run's CHECK_LOCAL_ARTIFACT, but nothing is committed.
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // COMMIT
        self.commit(id, &remote.version, remote.integrity, &dest, log)?;
        info!(artifact = %id, version = %remote.version, "fetched");
        Ok(SyncOutcome::Fetched)
    }

    /// Whether a local copy exists and verifies against the expected
    /// integrity. Used for skip decisions, where an unreadable or corrupt
    /// file simply means "cannot skip, re-fetch" rather than a job failure.
    fn local_copy_is_valid(&self, path: &Path, expected: &Integrity) -> bool {
        path.exists() && self.verifier.verify(path, expected).unwrap_or(false)
    }

    /// Write the receipt and upsert the store record.
    fn commit(
        &self,
        id: &ArtifactId,
        version: &str,
        integrity: Integrity,
        path: &Path,
        log: &mut dyn Write,
    ) -> Result<(), SyncError> {
        self.write_receipt(id, version, integrity.clone(), path)?;
        self.store.upsert(CacheRecord {
            kind: id.kind,
            name: id.name.clone(),
            version: version.to_string(),
            integrity,
            local_path: path.to_path_buf(),
            last_verified_at: Utc::now().timestamp(),
        })?;
        let _ = writeln!(log, "committed {id} {version}");
        Ok(())
    }

    fn write_receipt(
        &self,
        id: &ArtifactId,
        version: &str,
        integrity: Integrity,
        path: &Path,
    ) -> Result<(), SyncError> {
        let receipt = MetadataReceipt::now(id, version, integrity, path);
        self.receipts.write(id, &receipt)?;
        Ok(())
    }

    /// Move a corrupt file into the quarantine directory, preserving it
    /// under a timestamped name.
    fn quarantine(
        &self,
        id: &ArtifactId,
        version: &str,
        path: &Path,
    ) -> Result<PathBuf, SyncError> {
        let quarantine_dir = self.layout.quarantine_dir();
        std::fs::create_dir_all(&quarantine_dir).map_err(|e| SyncError::QuarantineFailed {
            path: quarantine_dir.clone(),
            source: e,
        })?;
        let dest = self
            .layout
            .quarantine_dest(id, version, Utc::now().timestamp());
        std::fs::rename(path, &dest).map_err(|e| SyncError::QuarantineFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(dest)
    }
}
