//! Crate registry source.
//!
//! The crates.io API does not expose a content digest through the endpoints
//! this wrapper uses, so resolved artifacts are tagged
//! [`Integrity::Pending`] and trusted on write.

use std::path::Path;

use tracing::debug;

use super::{download_to_file, HttpClient, HttpError, RemoteArtifact, SourceError, SourceResult};
use crate::artifact::{ArtifactKind, Integrity};
use crate::source::RegistrySource;

/// Default crates.io API endpoint.
const DEFAULT_API_BASE: &str = "https://crates.io/api/v1";

/// Default static download host.
const DEFAULT_DL_BASE: &str = "https://static.crates.io/crates";

/// Source for crate packages.
pub struct CratesIoSource<C: HttpClient> {
    client: C,
    api_base: String,
    dl_base: String,
    /// crates.io user id whose crates `discover` lists.
    owner_id: Option<u64>,
}

impl<C: HttpClient> CratesIoSource<C> {
    /// Create a source against the public registry.
    pub fn new(client: C) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            dl_base: DEFAULT_DL_BASE.to_string(),
            owner_id: None,
        }
    }

    /// Override the API and download endpoints (used by tests).
    pub fn with_endpoints(mut self, api_base: impl Into<String>, dl_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.dl_base = dl_base.into();
        self
    }

    /// Set the user id used for discovery.
    pub fn with_owner_id(mut self, owner_id: u64) -> Self {
        self.owner_id = Some(owner_id);
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

impl<C: HttpClient> RegistrySource for CratesIoSource<C> {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Crate
    }

    fn resolve_remote(&self, name: &str) -> SourceResult<RemoteArtifact> {
        let url = format!("{}/crates/{name}", self.api_base);
        let json = self.get_json(&url, name)?;

        let version = json
            .get("crate")
            .and_then(|c| c.get("max_version"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| SourceError::ParseFailed {
                name: name.to_string(),
                reason: "missing crate.max_version".to_string(),
            })?
            .to_string();

        debug!(name, %version, "resolved crate");
        Ok(RemoteArtifact {
            name: name.to_string(),
            version: version.clone(),
            integrity: Integrity::Pending,
            download_url: Some(format!("{}/{name}/{name}-{version}.crate", self.dl_base)),
        })
    }

    fn fetch(&self, remote: &RemoteArtifact, dest: &Path) -> SourceResult<()> {
        let url = remote
            .download_url
            .as_deref()
            .ok_or_else(|| SourceError::DownloadFailed {
                url: remote.name.clone(),
                reason: "no download URL resolved".to_string(),
            })?;
        download_to_file(&self.client, url, dest)
    }

    fn discover(&self) -> SourceResult<Vec<String>> {
        let owner_id = self.owner_id.ok_or(SourceError::DiscoveryUnconfigured {
            kind: ArtifactKind::Crate,
        })?;
        let url = format!("{}/crates?user_id={owner_id}&per_page=100", self.api_base);
        let json = self.get_json(&url, "discovery")?;

        let names = json
            .get("crates")
            .and_then(|c| c.as_array())
            .map(|crates| {
                crates
                    .iter()
                    .filter_map(|c| c.get("id").and_then(|v| v.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }
}
