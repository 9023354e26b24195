//! PackMirror CLI.
//!
//! Command-line front end over the `packmirror` library. The `sync`
//! command's exit code is zero on full success, otherwise the number of
//! failed artifacts so scripts can distinguish partial from total failure.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use commands::cache::CacheAction;
use commands::manifest::ManifestAction;
use commands::sync::SyncArgs;

#[derive(Debug, Parser)]
#[command(
    name = "packmirror",
    version,
    about = "Mirror crates, npm packages, git repositories, and gists into a verified local cache"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Synchronize an ecosystem's manifest into the cache
    Sync(SyncArgs),
    /// Inspect or maintain the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Inspect or merge artifact manifests
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },
}

#[tokio::main]
async fn main() {
    packmirror::telemetry::init_logging();
    let cli = Cli::parse();

    // Ctrl-C trips the token; in-flight jobs observe it between stages and
    // finish without committing.
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("interrupt received, finishing in-flight jobs");
        handler_token.cancel();
    }) {
        warn!(error = %e, "could not install Ctrl-C handler");
    }

    let result = match cli.command {
        Command::Sync(args) => commands::sync::run(args, cancel).await,
        Command::Cache { action } => commands::cache::run(action).map(|()| 0),
        Command::Manifest { action } => commands::manifest::run(action).map(|()| 0),
    };

    match result {
        Ok(code) => std::process::exit(i32::from(code)),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
