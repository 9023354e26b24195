//! npm registry source.
//!
//! npm exposes integrity either as an SRI string (`sha512-<base64>`) or a
//! legacy `shasum` (SHA-1 hex). SRI values are normalized to hex at resolve
//! time so verification can compare digests uniformly. A package missing
//! both degrades to [`Integrity::Pending`].

use std::path::Path;

use base64::Engine;
use tracing::{debug, warn};

use super::{download_to_file, HttpClient, HttpError, RemoteArtifact, SourceError, SourceResult};
use crate::artifact::{ArtifactKind, Integrity};
use crate::source::RegistrySource;

/// Default npm registry endpoint.
const DEFAULT_REGISTRY_BASE: &str = "https://registry.npmjs.org";

/// Source for npm package tarballs.
pub struct NpmSource<C: HttpClient> {
    client: C,
    registry_base: String,
    /// Maintainer account whose packages `discover` lists.
    maintainer: Option<String>,
}

impl<C: HttpClient> NpmSource<C> {
    /// Create a source against the public registry.
    pub fn new(client: C) -> Self {
        Self {
            client,
            registry_base: DEFAULT_REGISTRY_BASE.to_string(),
            maintainer: None,
        }
    }

    /// Override the registry endpoint (used by tests).
    pub fn with_registry(mut self, base: impl Into<String>) -> Self {
        self.registry_base = base.into();
        self
    }

    /// Set the maintainer account used for discovery.
    pub fn with_maintainer(mut self, maintainer: impl Into<String>) -> Self {
        self.maintainer = Some(maintainer.into());
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

/// Convert an npm `dist` object into an [`Integrity`] value.
///
/// Prefers the SRI `integrity` field, falls back to the legacy sha1
/// `shasum`, and degrades to `Pending` when neither is usable.
fn integrity_from_dist(name: &str, dist: &serde_json::Value) -> Integrity {
    if let Some(sri) = dist.get("integrity").and_then(|v| v.as_str()) {
        match parse_sri(sri) {
            Some(integrity) => return integrity,
            None => {
                warn!(name, sri, "unrecognized SRI integrity, trying shasum");
            }
        }
    }
    if let Some(shasum) = dist.get("shasum").and_then(|v| v.as_str()) {
        return Integrity::Sha1(shasum.to_lowercase());
    }
    warn!(name, "registry exposed no integrity, degrading to pending");
    Integrity::Pending
}

/// Parse an SRI string (`sha512-<base64>` or `sha256-<base64>`) into hex.
fn parse_sri(sri: &str) -> Option<Integrity> {
    let (algo, b64) = sri.split_once('-')?;
    let raw = base64::engine::general_purpose::STANDARD.decode(b64).ok()?;
    let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
    match algo {
        "sha512" => Some(Integrity::Sha512(hex)),
        "sha256" => Some(Integrity::Sha256(hex)),
        "sha1" => Some(Integrity::Sha1(hex)),
        _ => None,
    }
}

impl<C: HttpClient> RegistrySource for NpmSource<C> {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Npm
    }

    fn resolve_remote(&self, name: &str) -> SourceResult<RemoteArtifact> {
        // Scoped names keep their `/` unescaped-encoded per registry convention.
        let url = format!("{}/{}", self.registry_base, name.replace('/', "%2f"));
        let json = self.get_json(&url, name)?;

        let latest = json
            .get("dist-tags")
            .and_then(|t| t.get("latest"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| SourceError::ParseFailed {
                name: name.to_string(),
                reason: "missing dist-tags.latest".to_string(),
            })?
            .to_string();

        let dist = json
            .get("versions")
            .and_then(|v| v.get(&latest))
            .and_then(|v| v.get("dist"))
            .ok_or_else(|| SourceError::ParseFailed {
                name: name.to_string(),
                reason: format!("missing versions.{latest}.dist"),
            })?;

        let integrity = integrity_from_dist(name, dist);
        let tarball = dist
            .get("tarball")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        debug!(name, version = %latest, integrity = %integrity, "resolved npm package");
        Ok(RemoteArtifact {
            name: name.to_string(),
            version: latest,
            integrity,
            download_url: tarball,
        })
    }

    fn fetch(&self, remote: &RemoteArtifact, dest: &Path) -> SourceResult<()> {
        let url = remote
            .download_url
            .as_deref()
            .ok_or_else(|| SourceError::DownloadFailed {
                url: remote.name.clone(),
                reason: "no tarball URL resolved".to_string(),
            })?;
        download_to_file(&self.client, url, dest)
    }

    fn discover(&self) -> SourceResult<Vec<String>> {
        let maintainer = self
            .maintainer
            .as_deref()
            .ok_or(SourceError::DiscoveryUnconfigured {
                kind: ArtifactKind::Npm,
            })?;
        let url = format!(
            "{}/-/v1/search?text=maintainer:{maintainer}&size=100",
            self.registry_base
        );
        let json = self.get_json(&url, "discovery")?;

        let names = json
            .get("objects")
            .and_then(|o| o.as_array())
            .map(|objects| {
                objects
                    .iter()
                    .filter_map(|o| {
                        o.get("package")
                            .and_then(|p| p.get("name"))
                            .and_then(|v| v.as_str())
                    })
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }
}
