//! Core artifact identity types.
//!
//! An artifact is a downloadable unit tracked by the mirror: a crate source
//! package, an npm tarball, a git repository snapshot, or a gist. The
//! [`ArtifactId`] struct carries the identifying information shared across
//! all contexts: the cache store, receipts, the sync engine, and the CLI.
//!
//! Integrity values are represented as the tagged [`Integrity`] union with a
//! single verification dispatch, rather than ad hoc prefix-parsed strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The ecosystem an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// A source package from a crate registry (`.crate` tarball).
    Crate,
    /// An npm package tarball (`.tgz`).
    Npm,
    /// A git repository snapshot.
    GitRepo,
    /// A gist (small git repository hosted as a snippet).
    Gist,
}

impl ArtifactKind {
    /// All supported kinds, in canonical order.
    pub const ALL: [ArtifactKind; 4] = [Self::Crate, Self::Npm, Self::GitRepo, Self::Gist];

    /// Short lowercase label used in file formats and CLI arguments.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Crate => "crate",
            Self::Npm => "npm",
            Self::GitRepo => "repo",
            Self::Gist => "gist",
        }
    }

    /// Whether artifacts of this kind arrive as archives that need extraction.
    pub fn is_archive(&self) -> bool {
        matches!(self, Self::Crate | Self::Npm)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crate" => Ok(Self::Crate),
            "npm" => Ok(Self::Npm),
            "repo" => Ok(Self::GitRepo),
            "gist" => Ok(Self::Gist),
            other => Err(format!("unknown artifact kind: {other}")),
        }
    }
}

/// Identity of an artifact within one ecosystem.
///
/// Names are stored as given by the manifest; for npm this may include a
/// scope (`@org/pkg`), for repositories an `owner/name` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId {
    /// Which ecosystem the artifact comes from.
    pub kind: ArtifactKind,
    /// Registry name of the artifact.
    pub name: String,
}

impl ArtifactId {
    /// Create a new artifact identity.
    pub fn new(kind: ArtifactKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// A filesystem-safe form of the name (path separators and scope
    /// markers replaced), usable as a file or directory name.
    pub fn safe_name(&self) -> String {
        self.name.replace(['/', '@'], "_")
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Expected integrity of an artifact, tagged by algorithm.
///
/// The variant decides how [`crate::checksum::Verifier::verify`] checks a
/// local file:
///
/// - `Sha256` / `Sha1` / `Sha512` — content digest in lowercase hex
/// - `GitCommit` — a repository's identity is its commit id; checked by
///   comparing `HEAD`, content is never re-hashed
/// - `Pending` — the registry exposed no digest; trust-on-write
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Integrity {
    Sha256(String),
    Sha1(String),
    Sha512(String),
    GitCommit(String),
    Pending,
}

impl Integrity {
    /// Whether this value carries a real digest (anything except `Pending`).
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256(v) => write!(f, "sha256:{v}"),
            Self::Sha1(v) => write!(f, "sha1:{v}"),
            Self::Sha512(v) => write!(f, "sha512:{v}"),
            Self::GitCommit(v) => write!(f, "git:{v}"),
            Self::Pending => f.write_str("pending"),
        }
    }
}

impl FromStr for Integrity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "pending" {
            return Ok(Self::Pending);
        }
        let (tag, value) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed integrity value: {s}"))?;
        if value.is_empty() {
            return Err(format!("empty integrity value: {s}"));
        }
        match tag {
            "sha256" => Ok(Self::Sha256(value.to_string())),
            "sha1" => Ok(Self::Sha1(value.to_string())),
            "sha512" => Ok(Self::Sha512(value.to_string())),
            "git" => Ok(Self::GitCommit(value.to_string())),
            other => Err(format!("unknown integrity tag: {other}")),
        }
    }
}

impl From<Integrity> for String {
    fn from(value: Integrity) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Integrity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
