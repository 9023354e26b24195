//! PackMirror core library.
//!
//! Synchronizes artifacts from public registries (crate source packages,
//! npm tarballs, git repositories, gists) into a local content-verified
//! cache. The moving parts:
//!
//! - [`store::CacheStore`] — the persistent cache index; a lookup hits only
//!   on an exact `(kind, name, version, integrity)` match
//! - [`sync::SyncEngine`] — the per-artifact state machine from remote
//!   resolution through verification to commit
//! - [`executor::ParallelExecutor`] — bounded-concurrency batch runner with
//!   per-job logging, timeouts, and cancellation
//! - [`source`] — thin trait seams over registry I/O
//!
//! The binary crate `packmirror-cli` wires these together behind a command
//! line.

pub mod artifact;
pub mod checksum;
pub mod config;
pub mod executor;
pub mod extract;
pub mod manifest;
pub mod receipt;
pub mod source;
pub mod store;
pub mod sync;
pub mod telemetry;

pub use artifact::{ArtifactId, ArtifactKind, Integrity};
pub use config::{CacheLayout, ConfigFile};
pub use executor::{BatchSummary, ParallelExecutor, SyncJob};
pub use manifest::Manifest;
pub use store::{CacheRecord, CacheStore};
pub use sync::{SyncEngine, SyncError, SyncOutcome};
