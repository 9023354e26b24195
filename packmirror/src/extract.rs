//! Archive extraction for fetched artifacts.
//!
//! Crate source packages (`.crate`) and npm tarballs (`.tgz`) are both
//! gzipped tarballs; git snapshots arrive as directories and are placed,
//! not extracted. The [`ArchiveExtractor`] trait keeps the engine testable
//! with mock extractors.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use thiserror::Error;

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors that can occur during archive extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Failed to open the archive file.
    #[error("failed to open archive {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create the destination directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archive could not be unpacked.
    #[error("failed to extract {path}: {reason}")]
    UnpackFailed { path: PathBuf, reason: String },
}

/// Seam for unpacking downloaded archives.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract an archive into a destination directory.
    ///
    /// Returns the number of entries extracted.
    fn extract(&self, archive: &Path, dest_dir: &Path) -> ExtractResult<usize>;
}

/// In-process tar.gz extractor.
#[derive(Debug, Default)]
pub struct TarGzExtractor;

impl TarGzExtractor {
    /// Create a new extractor.
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExtractor for TarGzExtractor {
    fn extract(&self, archive: &Path, dest_dir: &Path) -> ExtractResult<usize> {
        fs::create_dir_all(dest_dir).map_err(|e| ExtractError::CreateDirFailed {
            path: dest_dir.to_path_buf(),
            source: e,
        })?;

        let file = fs::File::open(archive).map_err(|e| ExtractError::OpenFailed {
            path: archive.to_path_buf(),
            source: e,
        })?;

        let mut tarball = tar::Archive::new(GzDecoder::new(file));
        let entries = tarball.entries().map_err(|e| ExtractError::UnpackFailed {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut count = 0;
        for entry in entries {
            let mut entry = entry.map_err(|e| ExtractError::UnpackFailed {
                path: archive.to_path_buf(),
                reason: e.to_string(),
            })?;
            // unpack_in refuses paths escaping the destination.
            let unpacked = entry
                .unpack_in(dest_dir)
                .map_err(|e| ExtractError::UnpackFailed {
                    path: archive.to_path_buf(),
                    reason: e.to_string(),
                })?;
            if unpacked {
                count += 1;
            }
        }
        Ok(count)
    }
}
