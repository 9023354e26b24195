//! Configuration loading and cache directory layout.
//!
//! Settings come from an INI file at `<config dir>/packmirror/config.ini`;
//! a missing file means defaults. The cache root is resolved independently
//! of the config file so the order below is a public contract:
//!
//! 1. `PACKMIRROR_CACHE_DIR` environment variable
//! 2. `cache.directory` from the config file
//! 3. the platform user-cache directory (`~/.cache/packmirror` on Linux)
//! 4. a project-local `./.packmirror` fallback

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use crate::artifact::{ArtifactId, ArtifactKind};
use crate::checksum::VerifyPolicy;

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "PACKMIRROR_CACHE_DIR";

/// Default number of concurrently running sync jobs.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read or parsed.
    #[error("failed to load config {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    /// A setting has a value that does not parse.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Parsed configuration with defaults applied.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Concurrency ceiling for the executor.
    pub max_concurrency: usize,
    /// Per-job timeout in seconds; `None` disables the timeout.
    pub timeout_secs: Option<u64>,
    /// Verification strictness.
    pub verify_policy: VerifyPolicy,
    /// Cache root override from `cache.directory`.
    pub cache_directory: Option<PathBuf>,
    /// crates.io user id for `--discover` on the crate ecosystem.
    pub crates_owner_id: Option<u64>,
    /// npm maintainer account for `--discover` on the npm ecosystem.
    pub npm_maintainer: Option<String>,
    /// GitHub account for `--discover` on repos and gists.
    pub github_owner: Option<String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout_secs: None,
            verify_policy: VerifyPolicy::default(),
            cache_directory: None,
            crates_owner_id: None,
            npm_maintainer: None,
            github_owner: None,
        }
    }
}

impl ConfigFile {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("packmirror").join("config.ini"))
    }

    /// Load from the default location; a missing file yields defaults.
    pub fn load_default() -> ConfigResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and parse a config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "loaded config file");

        let mut config = Self::default();

        if let Some(sync) = ini.section(Some("sync")) {
            if let Some(value) = sync.get("max_concurrency") {
                config.max_concurrency = parse_setting("sync.max_concurrency", value)?;
            }
            if let Some(value) = sync.get("timeout_secs") {
                config.timeout_secs = Some(parse_setting("sync.timeout_secs", value)?);
            }
        }
        if let Some(verify) = ini.section(Some("verify")) {
            if let Some(value) = verify.get("policy") {
                config.verify_policy =
                    value
                        .parse::<VerifyPolicy>()
                        .map_err(|reason| ConfigError::InvalidValue {
                            key: "verify.policy".to_string(),
                            reason,
                        })?;
            }
        }
        if let Some(cache) = ini.section(Some("cache")) {
            if let Some(value) = cache.get("directory") {
                config.cache_directory = Some(PathBuf::from(value));
            }
        }
        if let Some(sources) = ini.section(Some("sources")) {
            if let Some(value) = sources.get("crates_owner_id") {
                config.crates_owner_id = Some(parse_setting("sources.crates_owner_id", value)?);
            }
            config.npm_maintainer = sources.get("npm_maintainer").map(str::to_string);
            config.github_owner = sources.get("github_owner").map(str::to_string);
        }

        Ok(config)
    }

    /// Resolve the cache root this configuration implies.
    pub fn resolve_cache_root(&self) -> PathBuf {
        resolve_cache_root(self.cache_directory.as_deref())
    }
}

fn parse_setting<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Resolve the cache root directory.
pub fn resolve_cache_root(config_override: Option<&Path>) -> PathBuf {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(dir) = config_override {
        return dir.to_path_buf();
    }
    if let Some(dir) = dirs::cache_dir() {
        return dir.join("packmirror");
    }
    PathBuf::from(".packmirror")
}

/// On-disk layout of the cache root.
///
/// All paths the library touches derive from here, so tests can point the
/// whole system into a temp directory by constructing one layout.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Create a layout rooted at `root`. No directories are created.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The cache store file.
    pub fn store_path(&self) -> PathBuf {
        self.root.join("store.txt")
    }

    /// Directory of per-artifact receipts.
    pub fn receipts_dir(&self) -> PathBuf {
        self.root.join("receipts")
    }

    /// Directory holding fetched artifacts.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    /// Directory where files failing verification are preserved.
    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }

    /// Directory of per-job log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Directory of persisted manifests.
    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    /// The persisted manifest for one ecosystem.
    pub fn manifest_path(&self, kind: ArtifactKind) -> PathBuf {
        self.manifests_dir().join(format!("{kind}.txt"))
    }

    /// Canonical destination for one artifact at one version.
    ///
    /// Archive ecosystems get a file path (`.crate` / `.tgz`); git
    /// ecosystems get the snapshot directory itself.
    pub fn artifact_dest(&self, id: &ArtifactId, version: &str) -> PathBuf {
        let dir = self
            .artifacts_dir()
            .join(id.kind.label())
            .join(id.safe_name())
            .join(version);
        match id.kind {
            ArtifactKind::Crate => dir.join(format!("{}-{version}.crate", id.safe_name())),
            ArtifactKind::Npm => dir.join(format!("{}-{version}.tgz", id.safe_name())),
            ArtifactKind::GitRepo | ArtifactKind::Gist => dir,
        }
    }

    /// Directory an archive artifact is unpacked into.
    pub fn contents_dir(&self, id: &ArtifactId, version: &str) -> PathBuf {
        self.artifacts_dir()
            .join(id.kind.label())
            .join(id.safe_name())
            .join(version)
            .join("contents")
    }

    /// Quarantine destination for a file failing verification.
    pub fn quarantine_dest(&self, id: &ArtifactId, version: &str, unix_ts: i64) -> PathBuf {
        self.quarantine_dir().join(format!(
            "{}-{}-{version}-{unix_ts}",
            id.kind,
            id.safe_name()
        ))
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            self.root.clone(),
            self.receipts_dir(),
            self.artifacts_dir(),
            self.quarantine_dir(),
            self.logs_dir(),
            self.manifests_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ConfigFile::default();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.timeout_secs, None);
        assert_eq!(config.verify_policy, VerifyPolicy::Strict);
        assert!(config.cache_directory.is_none());
    }

    #[test]
    fn test_load_full_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(
            &path,
            "[sync]\n\
             max_concurrency = 4\n\
             timeout_secs = 120\n\
             [verify]\n\
             policy = best-effort\n\
             [cache]\n\
             directory = /var/cache/mirror\n\
             [sources]\n\
             crates_owner_id = 42\n\
             npm_maintainer = alice\n\
             github_owner = alice\n",
        )
        .unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.timeout_secs, Some(120));
        assert_eq!(config.verify_policy, VerifyPolicy::BestEffort);
        assert_eq!(
            config.cache_directory.as_deref(),
            Some(Path::new("/var/cache/mirror"))
        );
        assert_eq!(config.crates_owner_id, Some(42));
        assert_eq!(config.npm_maintainer.as_deref(), Some("alice"));
        assert_eq!(config.github_owner.as_deref(), Some("alice"));
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(&path, "[sync]\nmax_concurrency = lots\n").unwrap();

        assert!(matches!(
            ConfigFile::load(&path),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_config_override_beats_platform_dir() {
        // The env override cannot be exercised safely in parallel tests;
        // covered here from the config override downward.
        let resolved = resolve_cache_root(Some(Path::new("/tmp/override")));
        assert_eq!(resolved, Path::new("/tmp/override"));
    }

    #[test]
    fn test_layout_paths() {
        let layout = CacheLayout::new("/cache");
        assert_eq!(layout.store_path(), Path::new("/cache/store.txt"));
        assert_eq!(layout.receipts_dir(), Path::new("/cache/receipts"));
        assert_eq!(layout.quarantine_dir(), Path::new("/cache/quarantine"));
        assert_eq!(
            layout.manifest_path(ArtifactKind::Npm),
            Path::new("/cache/manifests/npm.txt")
        );
    }

    #[test]
    fn test_artifact_dest_by_kind() {
        let layout = CacheLayout::new("/cache");

        let krate = ArtifactId::new(ArtifactKind::Crate, "serde");
        assert_eq!(
            layout.artifact_dest(&krate, "1.0.0"),
            Path::new("/cache/artifacts/crate/serde/1.0.0/serde-1.0.0.crate")
        );

        let npm = ArtifactId::new(ArtifactKind::Npm, "@scope/pkg");
        assert_eq!(
            layout.artifact_dest(&npm, "2.0.0"),
            Path::new("/cache/artifacts/npm/_scope_pkg/2.0.0/_scope_pkg-2.0.0.tgz")
        );

        let repo = ArtifactId::new(ArtifactKind::GitRepo, "alice/widget");
        assert_eq!(
            layout.artifact_dest(&repo, "deadbeef"),
            Path::new("/cache/artifacts/repo/alice_widget/deadbeef")
        );
    }

    #[test]
    fn test_ensure_creates_layout() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path().join("cache"));
        layout.ensure().unwrap();

        assert!(layout.receipts_dir().is_dir());
        assert!(layout.artifacts_dir().is_dir());
        assert!(layout.quarantine_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
        assert!(layout.manifests_dir().is_dir());
    }
}
