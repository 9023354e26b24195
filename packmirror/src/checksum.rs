//! File digest computation and integrity verification.
//!
//! This module provides:
//! - Streaming SHA-1/SHA-256/SHA-512 digests over files
//! - The [`Verifier`], which dispatches on an [`Integrity`] variant and
//!   applies the configured strictness policy
//!
//! Verification strictness is an explicit capability, selected by
//! configuration: [`VerifyPolicy::Strict`] fails closed when a digest cannot
//! be computed, [`VerifyPolicy::BestEffort`] accepts the file instead.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;

use sha2::Digest;
use thiserror::Error;
use tracing::warn;

use crate::artifact::Integrity;

/// Buffer size for streaming file hashing (64KB).
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Errors that can occur while computing a digest.
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// Failed to open or read the file being hashed.
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },
}

/// Verification strictness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    /// Fail closed: a digest that cannot be computed fails verification.
    #[default]
    Strict,
    /// Availability over strictness: accept the file when hashing is
    /// impossible, with a warning.
    BestEffort,
}

impl FromStr for VerifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "best-effort" => Ok(Self::BestEffort),
            other => Err(format!("unknown verify policy: {other}")),
        }
    }
}

/// Compute a streaming digest of a file with the given algorithm.
fn hash_file<D: Digest>(path: &Path) -> Result<String, ChecksumError> {
    let mut file = File::open(path).map_err(|e| ChecksumError::ReadFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut hasher = D::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| ChecksumError::ReadFailed {
                path: path.display().to_string(),
                source: e,
            })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Compute the SHA-256 digest of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String, ChecksumError> {
    hash_file::<sha2::Sha256>(path)
}

/// Compute the SHA-512 digest of a file as lowercase hex.
pub fn sha512_file(path: &Path) -> Result<String, ChecksumError> {
    hash_file::<sha2::Sha512>(path)
}

/// Compute the SHA-1 digest of a file as lowercase hex.
pub fn sha1_file(path: &Path) -> Result<String, ChecksumError> {
    hash_file::<sha1::Sha1>(path)
}

/// Whether the repository at `path` has `HEAD` at the expected commit.
///
/// A missing directory, a non-repository (for example the leftovers of an
/// interrupted clone), or a failed git invocation all count as
/// non-matching, so callers fall back to re-fetching.
fn git_head_matches(path: &Path, expected: &str) -> bool {
    let output = Command::new("git")
        .arg("-C")
        .arg(path)
        .args(["rev-parse", "HEAD"])
        .output();
    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .trim()
            .eq_ignore_ascii_case(expected),
        _ => false,
    }
}

/// Integrity verifier dispatching on the [`Integrity`] variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    policy: VerifyPolicy,
}

impl Verifier {
    /// Create a verifier with the given policy.
    pub fn new(policy: VerifyPolicy) -> Self {
        Self { policy }
    }

    /// The configured strictness policy.
    pub fn policy(&self) -> VerifyPolicy {
        self.policy
    }

    /// Verify a local file against an expected integrity value.
    ///
    /// Dispatch rules:
    /// - content digests are recomputed and compared (case-insensitive hex)
    /// - `GitCommit` compares the repository's `HEAD` to the expected
    ///   commit id; content is not re-hashed, and anything that is not a
    ///   repository at that commit (including a half-finished clone) fails
    /// - `Pending` always passes (trust-on-write)
    ///
    /// Under [`VerifyPolicy::BestEffort`], a digest that cannot be computed
    /// (for example, the file vanished mid-read) degrades to accepting the
    /// file; under [`VerifyPolicy::Strict`] the error propagates.
    pub fn verify(&self, path: &Path, expected: &Integrity) -> Result<bool, ChecksumError> {
        let computed = match expected {
            Integrity::Pending => {
                warn!(path = %path.display(), "no integrity on record, accepting file as-is");
                return Ok(true);
            }
            Integrity::GitCommit(commit) => return Ok(git_head_matches(path, commit)),
            Integrity::Sha256(_) => sha256_file(path),
            Integrity::Sha1(_) => sha1_file(path),
            Integrity::Sha512(_) => sha512_file(path),
        };

        let actual = match (computed, self.policy) {
            (Ok(digest), _) => digest,
            (Err(e), VerifyPolicy::BestEffort) => {
                warn!(path = %path.display(), error = %e, "hashing unavailable, accepting file");
                return Ok(true);
            }
            (Err(e), VerifyPolicy::Strict) => return Err(e),
        };

        let expected_hex = match expected {
            Integrity::Sha256(v) | Integrity::Sha1(v) | Integrity::Sha512(v) => v,
            _ => unreachable!("non-digest variants handled above"),
        };

        Ok(actual.eq_ignore_ascii_case(expected_hex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Integrity;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_known_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        fs::write(&path, b"hello world").unwrap();

        // SHA-256 of "hello world"
        assert_eq!(
            sha256_file(&path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha1_known_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        fs::write(&path, b"hello world").unwrap();

        // SHA-1 of "hello world"
        assert_eq!(
            sha1_file(&path).unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_verify_matching_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        fs::write(&path, b"payload").unwrap();

        let digest = sha256_file(&path).unwrap();
        let verifier = Verifier::new(VerifyPolicy::Strict);
        assert!(verifier
            .verify(&path, &Integrity::Sha256(digest))
            .unwrap());
    }

    #[test]
    fn test_verify_detects_flipped_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        fs::write(&path, b"payload").unwrap();
        let digest = sha256_file(&path).unwrap();

        // Corrupt the file after recording the digest.
        fs::write(&path, b"paXload").unwrap();

        let verifier = Verifier::new(VerifyPolicy::Strict);
        assert!(!verifier
            .verify(&path, &Integrity::Sha256(digest))
            .unwrap());
    }

    #[test]
    fn test_verify_pending_always_passes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("anything.bin");
        fs::write(&path, b"whatever").unwrap();

        let verifier = Verifier::new(VerifyPolicy::Strict);
        assert!(verifier.verify(&path, &Integrity::Pending).unwrap());
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.email=dev@example.com", "-c", "user.name=dev"])
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn head_of(dir: &Path) -> String {
        let out = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["rev-parse", "HEAD"])
            .output()
            .unwrap();
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    #[test]
    fn test_verify_git_commit_compares_head() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        fs::create_dir(&repo).unwrap();
        git(&repo, &["init"]);
        git(&repo, &["commit", "--allow-empty", "-m", "initial"]);
        let head = head_of(&repo);

        let verifier = Verifier::new(VerifyPolicy::Strict);
        assert!(verifier
            .verify(&repo, &Integrity::GitCommit(head))
            .unwrap());
        assert!(!verifier
            .verify(&repo, &Integrity::GitCommit("0".repeat(40)))
            .unwrap());
    }

    #[test]
    fn test_verify_git_commit_rejects_non_repository() {
        let temp = TempDir::new().unwrap();
        // A directory of leftovers, as an interrupted clone would leave.
        let junk = temp.path().join("half-clone");
        fs::create_dir(&junk).unwrap();
        fs::write(junk.join("leftover.txt"), b"partial").unwrap();

        let verifier = Verifier::new(VerifyPolicy::Strict);
        let commit = Integrity::GitCommit("deadbeef".into());
        assert!(!verifier.verify(&junk, &commit).unwrap());
        assert!(!verifier
            .verify(&temp.path().join("missing"), &commit)
            .unwrap());
    }

    #[test]
    fn test_strict_fails_closed_on_missing_file() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.bin");

        let verifier = Verifier::new(VerifyPolicy::Strict);
        let result = verifier.verify(&missing, &Integrity::Sha256("aa".into()));
        assert!(result.is_err());
    }

    #[test]
    fn test_best_effort_accepts_on_missing_file() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.bin");

        let verifier = Verifier::new(VerifyPolicy::BestEffort);
        let result = verifier.verify(&missing, &Integrity::Sha256("aa".into()));
        assert!(result.unwrap());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("strict".parse::<VerifyPolicy>().unwrap(), VerifyPolicy::Strict);
        assert_eq!(
            "best-effort".parse::<VerifyPolicy>().unwrap(),
            VerifyPolicy::BestEffort
        );
        assert!("lenient".parse::<VerifyPolicy>().is_err());
    }
}
