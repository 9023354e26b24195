//! Common types and utilities shared across CLI commands.

use std::sync::Arc;

use clap::ValueEnum;
use packmirror::config::{CacheLayout, ConfigFile};
use packmirror::source::{CratesIoSource, GitSource, NpmSource, RegistrySource, ReqwestClient};
use packmirror::ArtifactKind;

use crate::error::CliError;

/// Ecosystem selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Ecosystem {
    /// Crate source packages from crates.io
    Crate,
    /// npm package tarballs
    Npm,
    /// Git repositories
    Repo,
    /// Gists
    Gist,
}

impl From<Ecosystem> for ArtifactKind {
    fn from(value: Ecosystem) -> Self {
        match value {
            Ecosystem::Crate => ArtifactKind::Crate,
            Ecosystem::Npm => ArtifactKind::Npm,
            Ecosystem::Repo => ArtifactKind::GitRepo,
            Ecosystem::Gist => ArtifactKind::Gist,
        }
    }
}

/// Construct the registry source for an ecosystem, applying the owner
/// settings from the config so `--discover` works when configured.
pub fn build_source(
    kind: ArtifactKind,
    config: &ConfigFile,
) -> Result<Arc<dyn RegistrySource>, CliError> {
    let client = ReqwestClient::new().map_err(|e| CliError::Source(e.to_string()))?;

    let source: Arc<dyn RegistrySource> = match kind {
        ArtifactKind::Crate => {
            let mut source = CratesIoSource::new(client);
            if let Some(owner_id) = config.crates_owner_id {
                source = source.with_owner_id(owner_id);
            }
            Arc::new(source)
        }
        ArtifactKind::Npm => {
            let mut source = NpmSource::new(client);
            if let Some(maintainer) = &config.npm_maintainer {
                source = source.with_maintainer(maintainer.clone());
            }
            Arc::new(source)
        }
        ArtifactKind::GitRepo => {
            let mut source = GitSource::repos(client);
            if let Some(owner) = &config.github_owner {
                source = source.with_owner(owner.clone());
            }
            Arc::new(source)
        }
        ArtifactKind::Gist => {
            let mut source = GitSource::gists(client);
            if let Some(owner) = &config.github_owner {
                source = source.with_owner(owner.clone());
            }
            Arc::new(source)
        }
    };
    Ok(source)
}

/// Resolve and prepare the cache layout from configuration.
pub fn prepare_layout(config: &ConfigFile) -> Result<CacheLayout, CliError> {
    let layout = CacheLayout::new(config.resolve_cache_root());
    layout.ensure().map_err(|e| CliError::CacheRoot {
        path: layout.root().to_path_buf(),
        source: e,
    })?;
    Ok(layout)
}
