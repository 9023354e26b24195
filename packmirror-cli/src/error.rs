//! CLI error type.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a CLI command.
///
/// Per-artifact sync failures never surface here; they are counted in the
/// batch summary and become the exit code instead.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] packmirror::config::ConfigError),

    /// The cache root could not be prepared.
    #[error("failed to prepare cache directory {path}: {source}")]
    CacheRoot {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The cache store could not be opened or written.
    #[error(transparent)]
    Store(#[from] packmirror::store::StoreError),

    /// A manifest could not be read or written.
    #[error(transparent)]
    Manifest(#[from] packmirror::manifest::ManifestError),

    /// A registry source could not be constructed or queried.
    #[error("source error: {0}")]
    Source(String),

    /// The executor could not start the batch.
    #[error(transparent)]
    Executor(#[from] packmirror::executor::ExecutorError),

    /// A background task failed outside normal job accounting.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<packmirror::source::SourceError> for CliError {
    fn from(err: packmirror::source::SourceError) -> Self {
        Self::Source(err.to_string())
    }
}
