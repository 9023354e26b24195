//! Manifest inspection and merging CLI commands.

use std::path::PathBuf;

use clap::Subcommand;
use packmirror::config::ConfigFile;
use packmirror::{ArtifactKind, Manifest};

use crate::commands::common::{prepare_layout, Ecosystem};
use crate::error::CliError;

/// Manifest action subcommands.
#[derive(Debug, Subcommand)]
pub enum ManifestAction {
    /// Print the persisted manifest for an ecosystem
    Show {
        /// Ecosystem whose manifest to show
        #[arg(long, value_enum)]
        ecosystem: Ecosystem,
    },
    /// Merge another manifest file into the persisted one
    Merge {
        /// Ecosystem whose manifest to merge into
        #[arg(long, value_enum)]
        ecosystem: Ecosystem,
        /// File of artifact names, one per line
        file: PathBuf,
    },
}

/// Run a manifest subcommand.
pub fn run(action: ManifestAction) -> Result<(), CliError> {
    let config = ConfigFile::load_default()?;
    let layout = prepare_layout(&config)?;

    match action {
        ManifestAction::Show { ecosystem } => {
            let path = layout.manifest_path(ArtifactKind::from(ecosystem));
            let manifest = Manifest::load(&path)?;
            if manifest.is_empty() {
                println!("Manifest {} is empty", path.display());
            } else {
                for name in manifest.iter() {
                    println!("{name}");
                }
            }
            Ok(())
        }
        ManifestAction::Merge { ecosystem, file } => {
            let path = layout.manifest_path(ArtifactKind::from(ecosystem));
            let current = Manifest::load(&path)?;
            let incoming = Manifest::load(&file)?;
            let merged = current.merge(&incoming);
            merged.save(&path)?;
            println!(
                "Merged {} entries into {} ({} total)",
                incoming.len(),
                path.display(),
                merged.len()
            );
            Ok(())
        }
    }
}
