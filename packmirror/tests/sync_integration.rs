//! End-to-end sync passes against an in-memory registry.
//!
//! Drives the full stack (engine + executor + store + receipts) through the
//! scenarios that define the system: idempotent re-runs, corruption
//! self-healing, and failure isolation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use packmirror::checksum::{sha256_file, Verifier, VerifyPolicy};
use packmirror::config::CacheLayout;
use packmirror::extract::TarGzExtractor;
use packmirror::source::{RegistrySource, RemoteArtifact, SourceError, SourceResult};
use packmirror::{
    ArtifactId, ArtifactKind, CacheStore, Integrity, ParallelExecutor, SyncEngine, SyncJob,
    SyncOutcome,
};

/// Registry source serving any number of canned artifacts from memory.
struct FakeRegistry {
    kind: ArtifactKind,
    artifacts: HashMap<String, (RemoteArtifact, Vec<u8>)>,
    fetches: AtomicUsize,
}

impl FakeRegistry {
    fn new(kind: ArtifactKind) -> Self {
        Self {
            kind,
            artifacts: HashMap::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    fn publish(&mut self, name: &str, version: &str, payload: Vec<u8>, scratch: &Path) {
        fs::write(scratch, &payload).unwrap();
        let remote = RemoteArtifact {
            name: name.to_string(),
            version: version.to_string(),
            integrity: Integrity::Sha256(sha256_file(scratch).unwrap()),
            download_url: Some(format!("https://registry.test/{name}")),
        };
        self.artifacts.insert(name.to_string(), (remote, payload));
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl RegistrySource for FakeRegistry {
    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    fn resolve_remote(&self, name: &str) -> SourceResult<RemoteArtifact> {
        self.artifacts
            .get(name)
            .map(|(remote, _)| remote.clone())
            .ok_or_else(|| SourceError::RemoteNotFound {
                name: name.to_string(),
            })
    }

    fn fetch(&self, remote: &RemoteArtifact, dest: &Path) -> SourceResult<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let (_, payload) = &self.artifacts[&remote.name];
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(dest, payload).unwrap();
        Ok(())
    }

    fn discover(&self) -> SourceResult<Vec<String>> {
        let mut names: Vec<_> = self.artifacts.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Build a tiny gzipped tarball.
fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

struct Harness {
    _temp: TempDir,
    layout: CacheLayout,
    store: Arc<CacheStore>,
    engine: Arc<SyncEngine>,
    registry: Arc<FakeRegistry>,
}

impl Harness {
    fn new(registry: FakeRegistry) -> Self {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path().join("cache"));
        layout.ensure().unwrap();
        let store = Arc::new(CacheStore::open(layout.store_path()).unwrap());
        let registry = Arc::new(registry);
        let engine = Arc::new(SyncEngine::new(
            layout.clone(),
            Arc::clone(&store),
            Arc::clone(&registry) as Arc<dyn RegistrySource>,
            Arc::new(TarGzExtractor::new()),
            Verifier::new(VerifyPolicy::Strict),
        ));
        Self {
            _temp: temp,
            layout,
            store,
            engine,
            registry,
        }
    }

    fn jobs(&self, names: &[&str]) -> Vec<SyncJob> {
        names
            .iter()
            .map(|name| {
                SyncJob::for_engine(
                    Arc::clone(&self.engine),
                    ArtifactId::new(self.registry.kind(), *name),
                )
            })
            .collect()
    }

    async fn run(&self, names: &[&str], jobs: usize) -> packmirror::BatchSummary {
        ParallelExecutor::new(jobs)
            .run_bounded(self.jobs(names), &CancellationToken::new())
            .await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_run_is_a_no_op() {
    let scratch = TempDir::new().unwrap();
    let mut registry = FakeRegistry::new(ArtifactKind::Crate);
    registry.publish(
        "pkg-a",
        "1.0.0",
        tarball(&[("pkg-a/lib.rs", b"a" as &[u8])]),
        &scratch.path().join("a"),
    );
    registry.publish(
        "pkg-b",
        "2.0.0",
        tarball(&[("pkg-b/lib.rs", b"b" as &[u8])]),
        &scratch.path().join("b"),
    );
    let harness = Harness::new(registry);

    let first = harness.run(&["pkg-a", "pkg-b"], 2).await;
    assert_eq!(first.fetched_count(), 2);
    assert_eq!(first.failed_count(), 0);
    assert_eq!(harness.registry.fetch_count(), 2);
    let store_bytes = fs::read(harness.layout.store_path()).unwrap();

    // Unchanged manifest: zero fetches, store file byte-identical.
    let second = harness.run(&["pkg-a", "pkg-b"], 2).await;
    assert_eq!(second.fetched_count(), 0);
    assert_eq!(second.failed_count(), 0);
    assert_eq!(harness.registry.fetch_count(), 2);
    assert_eq!(fs::read(harness.layout.store_path()).unwrap(), store_bytes);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_skip_and_fetch_then_corruption_invalidates() {
    let scratch = TempDir::new().unwrap();
    let mut registry = FakeRegistry::new(ArtifactKind::Crate);
    registry.publish(
        "pkg-a",
        "1.0.0",
        tarball(&[("pkg-a/lib.rs", b"aaa" as &[u8])]),
        &scratch.path().join("a"),
    );
    registry.publish(
        "pkg-b",
        "2.0.0",
        tarball(&[("pkg-b/lib.rs", b"bbb" as &[u8])]),
        &scratch.path().join("b"),
    );
    let harness = Harness::new(registry);

    // pkg-a is already cached when pkg-b joins the manifest.
    assert_eq!(harness.run(&["pkg-a"], 2).await.fetched_count(), 1);

    let summary = harness.run(&["pkg-a", "pkg-b"], 2).await;
    let by_name: std::collections::HashMap<_, _> = summary
        .outcomes
        .iter()
        .map(|(id, outcome)| (id.name.as_str(), outcome.label()))
        .collect();
    assert_eq!(by_name["pkg-a"], "skipped");
    assert_eq!(by_name["pkg-b"], "fetched");
    assert_eq!(harness.registry.fetch_count(), 2);

    // Corrupt pkg-a's cached copy and rerun: the receipt and store still
    // match the remote metadata, but content verification invalidates the
    // local copy and forces a re-fetch.
    let a_id = ArtifactId::new(ArtifactKind::Crate, "pkg-a");
    let a_path = harness.layout.artifact_dest(&a_id, "1.0.0");
    fs::write(&a_path, b"flipped").unwrap();

    let rerun = harness.run(&["pkg-a", "pkg-b"], 2).await;
    assert_eq!(rerun.fetched_count(), 1);
    assert_eq!(rerun.failed_count(), 0);
    assert_eq!(harness.registry.fetch_count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lost_index_reconciles_and_corruption_heals() {
    let scratch = TempDir::new().unwrap();
    let mut registry = FakeRegistry::new(ArtifactKind::Crate);
    registry.publish(
        "pkg-a",
        "1.0.0",
        tarball(&[("pkg-a/lib.rs", b"aaa" as &[u8])]),
        &scratch.path().join("a"),
    );
    registry.publish(
        "pkg-b",
        "2.0.0",
        tarball(&[("pkg-b/lib.rs", b"bbb" as &[u8])]),
        &scratch.path().join("b"),
    );
    let harness = Harness::new(registry);
    assert_eq!(harness.run(&["pkg-a", "pkg-b"], 2).await.fetched_count(), 2);

    // Simulate losing the index: wipe the store file and receipts while
    // leaving the artifacts on disk, and corrupt pkg-b's copy.
    harness.store.clear().unwrap();
    fs::remove_dir_all(harness.layout.receipts_dir()).unwrap();
    let b_id = ArtifactId::new(ArtifactKind::Crate, "pkg-b");
    let b_path = harness.layout.artifact_dest(&b_id, "2.0.0");
    fs::write(&b_path, b"flipped bytes").unwrap();

    let summary = harness.run(&["pkg-a", "pkg-b"], 2).await;
    assert_eq!(summary.failed_count(), 0);

    let mut outcomes: Vec<_> = summary
        .outcomes
        .iter()
        .map(|(id, outcome)| (id.name.clone(), outcome.label()))
        .collect();
    outcomes.sort();
    // pkg-a's intact copy is adopted without a download; pkg-b's corrupt
    // copy fails verification and is re-fetched.
    assert_eq!(
        outcomes,
        vec![
            ("pkg-a".to_string(), "reconciled"),
            ("pkg-b".to_string(), "fetched"),
        ]
    );
    assert_eq!(harness.registry.fetch_count(), 3);

    // The healed copy verifies again.
    let healed = harness.run(&["pkg-a", "pkg-b"], 2).await;
    assert_eq!(healed.fetched_count(), 0);
    assert_eq!(healed.failed_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_served_corruption_is_never_committed() {
    let scratch = TempDir::new().unwrap();
    let mut registry = FakeRegistry::new(ArtifactKind::Crate);
    registry.publish(
        "pkg-a",
        "1.0.0",
        tarball(&[("pkg-a/lib.rs", b"x" as &[u8])]),
        &scratch.path().join("a"),
    );
    // Declare one digest, serve different bytes.
    if let Some((_, payload)) = registry.artifacts.get_mut("pkg-a") {
        *payload = b"tampered".to_vec();
    }
    let harness = Harness::new(registry);

    let summary = harness.run(&["pkg-a"], 1).await;
    assert_eq!(summary.failed_count(), 1);
    assert!(harness.store.is_empty());

    // The tampered file was preserved in quarantine for inspection.
    let quarantined: Vec<_> = fs::read_dir(harness.layout.quarantine_dir())
        .unwrap()
        .collect();
    assert_eq!(quarantined.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_bad_artifact_does_not_abort_the_batch() {
    let scratch = TempDir::new().unwrap();
    let mut registry = FakeRegistry::new(ArtifactKind::Crate);
    for name in ["pkg-a", "pkg-b", "pkg-c"] {
        registry.publish(
            name,
            "1.0.0",
            tarball(&[("lib.rs", name.as_bytes())]),
            &scratch.path().join(name),
        );
    }
    let harness = Harness::new(registry);

    // "withdrawn" is not published anywhere.
    let summary = harness
        .run(&["pkg-a", "withdrawn", "pkg-b", "pkg-c"], 2)
        .await;

    assert_eq!(summary.len(), 4);
    assert_eq!(summary.fetched_count(), 3);
    // The failed count doubles as the process exit code.
    assert_eq!(summary.failed_count(), 1);
    for (id, outcome) in &summary.outcomes {
        if id.name == "withdrawn" {
            assert!(matches!(outcome, SyncOutcome::Failed(_)));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_batch_respects_concurrency_bound() {
    let scratch = TempDir::new().unwrap();
    let mut registry = FakeRegistry::new(ArtifactKind::Crate);
    let names: Vec<String> = (0..12).map(|i| format!("pkg-{i}")).collect();
    for name in &names {
        registry.publish(
            name,
            "1.0.0",
            tarball(&[("lib.rs", name.as_bytes())]),
            &scratch.path().join(name),
        );
    }
    let harness = Harness::new(registry);

    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let summary = harness.run(&name_refs, 3).await;

    assert_eq!(summary.len(), 12);
    assert_eq!(summary.failed_count(), 0);
    assert_eq!(summary.fetched_count(), 12);
    assert_eq!(harness.store.len(), 12);
}
