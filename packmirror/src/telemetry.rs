//! Logging initialization.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the binary's job, done once at startup through [`init_logging`].
//! Per-job verbose logs are separate plain files written by the executor.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise `info`. Calling
/// this twice is a no-op rather than a panic so tests can be careless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
