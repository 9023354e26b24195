//! The `sync` command: run one ecosystem's manifest through the engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use packmirror::checksum::Verifier;
use packmirror::config::ConfigFile;
use packmirror::extract::TarGzExtractor;
use packmirror::source::RegistrySource;
use packmirror::{
    ArtifactId, ArtifactKind, CacheStore, Manifest, ParallelExecutor, SyncEngine, SyncJob,
    SyncOutcome,
};

use crate::commands::common::{build_source, prepare_layout, Ecosystem};
use crate::error::CliError;

/// Arguments for `packmirror sync`.
#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Ecosystem to synchronize
    #[arg(long, value_enum)]
    pub ecosystem: Ecosystem,

    /// Merge registry discovery results into the manifest before syncing
    #[arg(long)]
    pub discover: bool,

    /// Merge discovery results and exit without fetching anything
    #[arg(long)]
    pub discover_only: bool,

    /// Concurrency ceiling, overriding the configured value
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Manifest file to sync (defaults to the per-ecosystem manifest in
    /// the cache)
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

/// Run a sync pass. Returns the process exit code: zero on full success,
/// otherwise the number of failed artifacts.
pub async fn run(args: SyncArgs, cancel: CancellationToken) -> Result<u8, CliError> {
    let kind = ArtifactKind::from(args.ecosystem);
    let config = ConfigFile::load_default()?;
    let layout = prepare_layout(&config)?;

    let manifest_path = args
        .manifest
        .unwrap_or_else(|| layout.manifest_path(kind));
    let mut manifest = Manifest::load(&manifest_path)?;
    let source = build_source(kind, &config)?;

    if args.discover || args.discover_only {
        manifest = discover_into(&manifest, Arc::clone(&source)).await?;
        manifest.save(&manifest_path)?;
        println!(
            "Manifest {} now lists {} artifacts",
            manifest_path.display(),
            manifest.len()
        );
        if args.discover_only {
            return Ok(0);
        }
    }

    if manifest.is_empty() {
        println!("Nothing to sync: manifest {} is empty", manifest_path.display());
        return Ok(0);
    }

    let store = Arc::new(CacheStore::open(layout.store_path())?);
    let engine = Arc::new(SyncEngine::new(
        layout.clone(),
        store,
        source,
        Arc::new(TarGzExtractor::new()),
        Verifier::new(config.verify_policy),
    ));

    let jobs: Vec<SyncJob> = manifest
        .iter()
        .map(|name| SyncJob::for_engine(Arc::clone(&engine), ArtifactId::new(kind, name)))
        .collect();

    let mut executor = ParallelExecutor::new(args.jobs.unwrap_or(config.max_concurrency));
    if let Some(secs) = config.timeout_secs {
        executor = executor.with_job_timeout(Duration::from_secs(secs));
    }

    let summary = executor
        .run_bounded_with_logging(jobs, &cancel, &layout.logs_dir())
        .await?;

    let mut skipped = 0usize;
    for (artifact, outcome) in &summary.outcomes {
        match outcome {
            SyncOutcome::Skipped | SyncOutcome::SkippedReconciled => skipped += 1,
            SyncOutcome::Fetched => {}
            SyncOutcome::Failed(e) => eprintln!("{artifact}: {e}"),
        }
    }
    println!(
        "Synced {} artifacts: {} fetched, {} up to date, {} failed",
        summary.len(),
        summary.fetched_count(),
        skipped,
        summary.failed_count()
    );

    Ok(summary.failed_count().min(255) as u8)
}

/// Run discovery on a blocking worker and union the results into the
/// manifest.
async fn discover_into(
    manifest: &Manifest,
    source: Arc<dyn RegistrySource>,
) -> Result<Manifest, CliError> {
    let discovered = tokio::task::spawn_blocking(move || source.discover())
        .await
        .map_err(|e| CliError::Internal(e.to_string()))??;
    if discovered.is_empty() {
        warn!("discovery returned no artifacts");
    }
    Ok(manifest.merge(&Manifest::from_entries(discovered)))
}
