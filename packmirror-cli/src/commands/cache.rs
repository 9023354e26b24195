//! Cache management CLI commands.

use std::collections::BTreeMap;
use std::fs;

use clap::Subcommand;
use packmirror::config::ConfigFile;
use packmirror::CacheStore;

use crate::commands::common::prepare_layout;
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Drop records whose artifacts no longer exist on disk
    Validate,
    /// Remove all cached artifacts, receipts, and store records
    Clear,
}

/// Run a cache subcommand.
pub fn run(action: CacheAction) -> Result<(), CliError> {
    let config = ConfigFile::load_default()?;
    let layout = prepare_layout(&config)?;
    let store = CacheStore::open(layout.store_path())?;

    match action {
        CacheAction::Stats => {
            println!("Cache root: {}", layout.root().display());
            println!("  Records: {}", store.len());

            let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
            for record in store.records() {
                *by_kind.entry(record.kind.label()).or_default() += 1;
            }
            for (kind, count) in by_kind {
                println!("    {kind}: {count}");
            }
            Ok(())
        }
        CacheAction::Validate => {
            let pruned = store.validate()?;
            println!("Pruned {pruned} dead records, {} remain", store.len());
            Ok(())
        }
        CacheAction::Clear => {
            store.clear()?;
            for dir in [layout.artifacts_dir(), layout.receipts_dir()] {
                if dir.exists() {
                    fs::remove_dir_all(&dir).map_err(|e| CliError::CacheRoot {
                        path: dir.clone(),
                        source: e,
                    })?;
                }
            }
            println!("Cleared cache at {}", layout.root().display());
            Ok(())
        }
    }
}
