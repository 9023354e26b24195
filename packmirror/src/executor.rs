//! Bounded-parallel execution of sync jobs.
//!
//! The executor admits at most `max_concurrency` jobs at a time using a
//! counting semaphore; the submit loop suspends until a slot frees. Sync
//! work is blocking (file hashing, blocking HTTP, `git` subprocesses), so
//! each job runs on a blocking-capable worker thread while the async side
//! only orchestrates admission, timeouts, and cancellation.
//!
//! The only ordering guarantee is the concurrency ceiling; completion order
//! is whatever the runtime produces.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifact::ArtifactId;
use crate::config::DEFAULT_MAX_CONCURRENCY;
use crate::sync::{SyncEngine, SyncError, SyncOutcome};

/// Errors preventing a batch from running at all.
///
/// Per-job failures are not errors; they surface as
/// [`SyncOutcome::Failed`] entries in the summary.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The per-job log directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    LogDirFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One unit of work for the executor.
pub struct SyncJob {
    /// The artifact this job syncs, used for summaries and log file names.
    pub artifact: ArtifactId,
    work: Box<dyn FnOnce(CancellationToken, &mut dyn Write) -> SyncOutcome + Send + 'static>,
}

impl SyncJob {
    /// Wrap an arbitrary closure as a job.
    pub fn new(
        artifact: ArtifactId,
        work: impl FnOnce(CancellationToken, &mut dyn Write) -> SyncOutcome + Send + 'static,
    ) -> Self {
        Self {
            artifact,
            work: Box::new(work),
        }
    }

    /// A job that runs one artifact through a shared [`SyncEngine`].
    pub fn for_engine(engine: Arc<SyncEngine>, artifact: ArtifactId) -> Self {
        let id = artifact.clone();
        Self::new(artifact, move |cancel, log| engine.sync(&id, &cancel, log))
    }
}

/// Outcome list for one batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Terminal outcome per artifact, in completion order.
    pub outcomes: Vec<(ArtifactId, SyncOutcome)>,
}

impl BatchSummary {
    /// Number of jobs in the batch.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of failed jobs; callers use this to distinguish partial from
    /// total failure (and as the process exit code).
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .count()
    }

    /// Number of jobs that downloaded something.
    pub fn fetched_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, SyncOutcome::Fetched))
            .count()
    }
}

/// Runs batches of sync jobs with a concurrency ceiling.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    max_concurrency: usize,
    job_timeout: Option<Duration>,
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl ParallelExecutor {
    /// Create an executor with the given concurrency ceiling (minimum 1).
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            job_timeout: None,
        }
    }

    /// Apply a per-job timeout. A job exceeding it is recorded as
    /// [`SyncError::TimedOut`] and its cancellation token is tripped; the
    /// slot stays held until the worker observes the token and stops, so
    /// the concurrency ceiling covers late finishers too.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Run all jobs with bounded concurrency, discarding verbose job output.
    pub async fn run_bounded(
        &self,
        jobs: Vec<SyncJob>,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        self.run(jobs, cancel, None).await
    }

    /// Run all jobs with bounded concurrency, writing each job's verbose
    /// output to a private timestamped file under `log_dir`.
    pub async fn run_bounded_with_logging(
        &self,
        jobs: Vec<SyncJob>,
        cancel: &CancellationToken,
        log_dir: &Path,
    ) -> Result<BatchSummary, ExecutorError> {
        std::fs::create_dir_all(log_dir).map_err(|e| ExecutorError::LogDirFailed {
            path: log_dir.to_path_buf(),
            source: e,
        })?;
        Ok(self.run(jobs, cancel, Some(log_dir.to_path_buf())).await)
    }

    async fn run(
        &self,
        jobs: Vec<SyncJob>,
        cancel: &CancellationToken,
        log_dir: Option<PathBuf>,
    ) -> BatchSummary {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set: JoinSet<(ArtifactId, SyncOutcome)> = JoinSet::new();

        for job in jobs {
            // Suspends until a slot frees; this is the admission bound.
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                // The semaphore is never closed; bail out if it somehow is.
                Err(_) => break,
            };

            // Each job gets a child token so a timeout can stop this job
            // without touching its siblings; cancelling the batch token
            // still reaches every child.
            let job_cancel = cancel.child_token();
            let timeout = self.job_timeout;
            let log_path = log_dir.as_ref().map(|dir| job_log_path(dir, &job.artifact));
            let artifact = job.artifact.clone();
            let work = job.work;

            set.spawn(async move {
                let _permit = permit;
                let worker_cancel = job_cancel.clone();
                let mut handle = tokio::task::spawn_blocking(move || {
                    let mut log = open_job_log(log_path.as_deref());
                    let outcome = (work)(worker_cancel, log.as_mut());
                    let _ = log.flush();
                    outcome
                });

                let outcome = match timeout {
                    Some(duration) => match tokio::time::timeout(duration, &mut handle).await {
                        Ok(joined) => fold_join(joined),
                        Err(_) => {
                            // The slot (permit) is held until the worker
                            // observes the token and returns, so timed-out
                            // jobs still count against the ceiling and can
                            // never commit after being reported.
                            job_cancel.cancel();
                            let _ = handle.await;
                            SyncOutcome::Failed(SyncError::TimedOut {
                                secs: duration.as_secs(),
                            })
                        }
                    },
                    None => fold_join(handle.await),
                };

                info!(artifact = %artifact, outcome = outcome.label(), "job finished");
                (artifact, outcome)
            });
        }

        let mut summary = BatchSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => summary.outcomes.push(entry),
                Err(e) => warn!(error = %e, "lost a job handle"),
            }
        }
        summary
    }
}

fn fold_join(joined: Result<SyncOutcome, tokio::task::JoinError>) -> SyncOutcome {
    joined.unwrap_or_else(|e| {
        SyncOutcome::Failed(SyncError::Aborted {
            reason: e.to_string(),
        })
    })
}

fn job_log_path(dir: &Path, artifact: &ArtifactId) -> PathBuf {
    dir.join(format!(
        "{}-{}-{}.log",
        artifact.kind,
        artifact.safe_name(),
        Utc::now().timestamp()
    ))
}

/// Open the per-job log, degrading to a sink if the file cannot be created.
fn open_job_log(path: Option<&Path>) -> Box<dyn Write + Send> {
    match path {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open job log, discarding output");
                Box::new(std::io::sink())
            }
        },
        None => Box::new(std::io::sink()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn id(name: &str) -> ArtifactId {
        ArtifactId::new(ArtifactKind::Crate, name)
    }

    fn counting_job(
        name: &str,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> SyncJob {
        SyncJob::new(id(name), move |_cancel, _log| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            SyncOutcome::Fetched
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..12)
            .map(|i| {
                counting_job(
                    &format!("pkg-{i}"),
                    Arc::clone(&running),
                    Arc::clone(&peak),
                )
            })
            .collect();

        let executor = ParallelExecutor::new(3);
        let summary = executor.run_bounded(jobs, &CancellationToken::new()).await;

        assert_eq!(summary.len(), 12);
        assert_eq!(summary.failed_count(), 0);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        // Sanity: the bound was actually exercised.
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failures_are_isolated_and_counted() {
        let jobs = vec![
            SyncJob::new(id("good"), |_c, _l| SyncOutcome::Fetched),
            SyncJob::new(id("bad"), |_c, _l| {
                SyncOutcome::Failed(SyncError::RemoteNotFound {
                    name: "bad".to_string(),
                })
            }),
            SyncJob::new(id("also-good"), |_c, _l| SyncOutcome::Skipped),
        ];

        let summary = ParallelExecutor::new(2)
            .run_bounded(jobs, &CancellationToken::new())
            .await;

        assert_eq!(summary.len(), 3);
        assert_eq!(summary.failed_count(), 1);
        assert_eq!(summary.fetched_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_timeout_is_recorded() {
        let jobs = vec![SyncJob::new(id("slow"), |_c, _l| {
            std::thread::sleep(Duration::from_millis(200));
            SyncOutcome::Fetched
        })];

        let summary = ParallelExecutor::new(1)
            .with_job_timeout(Duration::from_millis(50))
            .run_bounded(jobs, &CancellationToken::new())
            .await;

        assert_eq!(summary.failed_count(), 1);
        assert!(matches!(
            summary.outcomes[0].1,
            SyncOutcome::Failed(SyncError::TimedOut { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_timeout_cancels_job_and_keeps_ceiling() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let late_commits = Arc::new(AtomicUsize::new(0));

        // Each job outlives the timeout by a wide margin. The first one
        // must keep its slot until it returns, so the second never starts
        // alongside it, and neither "commits" after its token trips.
        let jobs: Vec<_> = (0..2)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                let late_commits = Arc::clone(&late_commits);
                SyncJob::new(id(&format!("slow-{i}")), move |cancel, _log| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(300));
                    running.fetch_sub(1, Ordering::SeqCst);
                    if !cancel.is_cancelled() {
                        late_commits.fetch_add(1, Ordering::SeqCst);
                    }
                    SyncOutcome::Fetched
                })
            })
            .collect();

        let summary = ParallelExecutor::new(1)
            .with_job_timeout(Duration::from_millis(50))
            .run_bounded(jobs, &CancellationToken::new())
            .await;

        assert_eq!(summary.failed_count(), 2);
        for (_, outcome) in &summary.outcomes {
            assert!(matches!(
                outcome,
                SyncOutcome::Failed(SyncError::TimedOut { .. })
            ));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(late_commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellation_reaches_jobs() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let jobs = vec![SyncJob::new(id("pkg"), |cancel, _l| {
            if cancel.is_cancelled() {
                SyncOutcome::Failed(SyncError::Cancelled)
            } else {
                SyncOutcome::Fetched
            }
        })];

        let summary = ParallelExecutor::new(1).run_bounded(jobs, &cancel).await;
        assert!(matches!(
            summary.outcomes[0].1,
            SyncOutcome::Failed(SyncError::Cancelled)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_per_job_logging_writes_files() {
        let temp = TempDir::new().unwrap();
        let log_dir = temp.path().join("logs");

        let jobs = vec![SyncJob::new(id("pkg"), |_c, log| {
            writeln!(log, "hello from the job").unwrap();
            SyncOutcome::Fetched
        })];

        let summary = ParallelExecutor::new(1)
            .run_bounded_with_logging(jobs, &CancellationToken::new(), &log_dir)
            .await
            .unwrap();

        assert_eq!(summary.failed_count(), 0);
        let entries: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let contents =
            std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(contents.contains("hello from the job"));
    }
}
