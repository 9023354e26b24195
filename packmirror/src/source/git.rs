//! Git-backed source for repositories and gists.
//!
//! A repository's identity is its commit id, so resolving the remote is a
//! `git ls-remote` and fetching is a shallow `git clone` into the snapshot
//! directory. Discovery goes through the GitHub API over the shared
//! [`HttpClient`] seam.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use super::{HttpClient, HttpError, RemoteArtifact, SourceError, SourceResult};
use crate::artifact::{ArtifactKind, Integrity};
use crate::source::RegistrySource;

/// Default GitHub API endpoint for discovery.
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Source for git repositories and gists.
///
/// `kind` is restricted to [`ArtifactKind::GitRepo`] and
/// [`ArtifactKind::Gist`] by the constructors.
pub struct GitSource<C: HttpClient> {
    client: C,
    kind: ArtifactKind,
    api_base: String,
    /// Account whose repositories or gists `discover` lists.
    owner: Option<String>,
}

impl<C: HttpClient> GitSource<C> {
    /// Create a source for full repositories (`owner/name` identifiers).
    pub fn repos(client: C) -> Self {
        Self {
            client,
            kind: ArtifactKind::GitRepo,
            api_base: DEFAULT_API_BASE.to_string(),
            owner: None,
        }
    }

    /// Create a source for gists (gist-id identifiers).
    pub fn gists(client: C) -> Self {
        Self {
            client,
            kind: ArtifactKind::Gist,
            api_base: DEFAULT_API_BASE.to_string(),
            owner: None,
        }
    }

    /// Override the API endpoint (used by tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Set the account used for discovery.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    fn get_json(&self, url: &str, name: &str) -> SourceResult<serde_json::Value> {
        let body = match self.client.get(url) {
            Ok(body) => body,
            Err(HttpError::NotFound(_)) => {
                return Err(SourceError::RemoteNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&body).map_err(|e| SourceError::ParseFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Clone URL for an artifact name.
///
/// Repositories are `owner/name` pairs on github.com; gists are identified
/// by their id on gist.github.com.
fn clone_url(kind: ArtifactKind, name: &str) -> String {
    match kind {
        ArtifactKind::Gist => format!("https://gist.github.com/{name}.git"),
        _ => format!("https://github.com/{name}.git"),
    }
}

/// Extract the HEAD commit id from `git ls-remote` output.
fn parse_ls_remote(output: &str) -> Option<String> {
    output
        .lines()
        .next()?
        .split_whitespace()
        .next()
        .filter(|commit| !commit.is_empty())
        .map(str::to_string)
}

/// Run a git command, mapping a non-zero exit to [`SourceError::GitFailed`].
fn run_git(args: &[&str]) -> SourceResult<String> {
    let pretty = args.join(" ");
    let output = Command::new("git")
        .args(args)
        .output()
        .map_err(|e| SourceError::GitFailed {
            args: pretty.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SourceError::GitFailed {
            args: pretty,
            reason: stderr.trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl<C: HttpClient> RegistrySource for GitSource<C> {
    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    fn resolve_remote(&self, name: &str) -> SourceResult<RemoteArtifact> {
        let url = clone_url(self.kind, name);
        let stdout = run_git(&["ls-remote", &url, "HEAD"])?;

        let commit = parse_ls_remote(&stdout).ok_or_else(|| SourceError::RemoteNotFound {
            name: name.to_string(),
        })?;

        debug!(name, %commit, "resolved git HEAD");
        Ok(RemoteArtifact {
            name: name.to_string(),
            version: commit.clone(),
            integrity: Integrity::GitCommit(commit),
            // The clone URL is derived from the name again at fetch time.
            download_url: None,
        })
    }

    fn fetch(&self, remote: &RemoteArtifact, dest: &Path) -> SourceResult<()> {
        let url = clone_url(self.kind, &remote.name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SourceError::WriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        // A leftover directory from an interrupted run would make clone fail.
        if dest.exists() {
            std::fs::remove_dir_all(dest).map_err(|e| SourceError::WriteFailed {
                path: dest.to_path_buf(),
                source: e,
            })?;
        }

        let dest_str = dest.to_string_lossy();
        run_git(&["clone", "--depth", "1", &url, &dest_str])?;
        Ok(())
    }

    fn discover(&self) -> SourceResult<Vec<String>> {
        let owner = self
            .owner
            .as_deref()
            .ok_or(SourceError::DiscoveryUnconfigured { kind: self.kind })?;

        let (url, field) = match self.kind {
            ArtifactKind::Gist => (
                format!("{}/users/{owner}/gists?per_page=100", self.api_base),
                "id",
            ),
            _ => (
                format!("{}/users/{owner}/repos?per_page=100", self.api_base),
                "full_name",
            ),
        };
        let json = self.get_json(&url, "discovery")?;

        let names = json
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(field).and_then(|v| v.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }
}
