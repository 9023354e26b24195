//! Registry source abstraction.
//!
//! This module provides traits and implementations for talking to the
//! supported registries (crates.io, the npm registry, git hosting for
//! repositories and gists). Sources are deliberately thin I/O wrappers:
//! they resolve the latest remote version and integrity, download one
//! artifact, and list an owner's artifacts for discovery. Everything else
//! (caching, verification, extraction) belongs to the sync engine.

mod crates_io;
mod git;
mod http;
mod npm;

pub use crates_io::CratesIoSource;
pub use git::GitSource;
pub use http::{HttpClient, HttpError, ReqwestClient};
pub use npm::NpmSource;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::artifact::{ArtifactKind, Integrity};

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors that can occur while talking to a registry.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The artifact does not exist upstream (withdrawn or never published).
    #[error("no remote found for {name}")]
    RemoteNotFound { name: String },

    /// An HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// A registry response could not be interpreted.
    #[error("failed to parse registry response for {name}: {reason}")]
    ParseFailed { name: String, reason: String },

    /// Downloading the artifact payload failed.
    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// A git command failed.
    #[error("git {args} failed: {reason}")]
    GitFailed { args: String, reason: String },

    /// Failed to write the downloaded payload.
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Discovery was requested but the source has no owner configured.
    #[error("discovery is not configured for the {kind} source")]
    DiscoveryUnconfigured { kind: ArtifactKind },
}

impl From<HttpError> for SourceError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::NotFound(url) => SourceError::Http(format!("404 from {url}")),
            HttpError::Failed(msg) => SourceError::Http(msg),
        }
    }
}

/// The resolved state of an artifact upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    /// Registry name.
    pub name: String,
    /// Latest version (or commit id for git sources).
    pub version: String,
    /// Expected integrity; `Pending` when the registry exposes none.
    pub integrity: Integrity,
    /// Download location for HTTP sources; git sources derive the URL
    /// from the artifact name instead.
    pub download_url: Option<String>,
}

/// One registry a sync pass can pull from.
///
/// Implementations are blocking; the executor runs each sync job on a
/// blocking-capable worker.
pub trait RegistrySource: Send + Sync {
    /// Which ecosystem this source serves.
    fn kind(&self) -> ArtifactKind;

    /// Query the latest version and integrity of an artifact.
    fn resolve_remote(&self, name: &str) -> SourceResult<RemoteArtifact>;

    /// Download one resolved artifact to `dest`.
    ///
    /// For archive ecosystems `dest` is the archive file path; for git
    /// sources it is the snapshot directory.
    fn fetch(&self, remote: &RemoteArtifact, dest: &Path) -> SourceResult<()>;

    /// List artifact names owned by the configured account, for
    /// `--discover`.
    fn discover(&self) -> SourceResult<Vec<String>>;
}

/// Download `url` into the file at `dest`, creating parent directories.
///
/// Shared by the HTTP-backed sources.
pub(crate) fn download_to_file(
    client: &dyn HttpClient,
    url: &str,
    dest: &Path,
) -> SourceResult<()> {
    let body = client.get(url).map_err(|e| SourceError::DownloadFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SourceError::WriteFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(dest, body).map_err(|e| SourceError::WriteFailed {
        path: dest.to_path_buf(),
        source: e,
    })
}
