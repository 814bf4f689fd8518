pub mod config;
pub mod dedup;
pub mod dividend;
pub mod error;
pub mod importer;
pub mod importers;
pub mod log;
pub mod model;
pub mod mt940;
pub mod prices;

use crate::model::Entry;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub enum AppCommand {
    List,
    Identify { path: PathBuf },
    Extract { path: PathBuf, existing: Option<PathBuf> },
}

fn load_existing(path: &Path) -> Result<Vec<Entry>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ledger file: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse ledger file: {}", path.display()))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => config::AppConfig::load_from_path(path)?,
        None => config::AppConfig::default(),
    };
    debug!("Loaded config: {config:#?}");
    let importers = importers::build_importers(&config)?;

    match command {
        AppCommand::List => {
            for importer in &importers {
                println!("{}", importer.name());
            }
            Ok(())
        }
        AppCommand::Identify { path } => {
            for importer in importers.iter().filter(|i| i.identify(&path)) {
                let account = importer.account(&path);
                if account.is_empty() {
                    println!("{}", importer.name());
                } else {
                    println!("{}\t{account}", importer.name());
                }
            }
            Ok(())
        }
        AppCommand::Extract { path, existing } => {
            let existing = match existing {
                Some(ledger) => load_existing(&ledger)?,
                None => Vec::new(),
            };

            let mut extracted = Vec::new();
            for importer in importers.iter().filter(|i| i.identify(&path)) {
                info!(importer = importer.name(), "extracting");
                let entries = importer
                    .extract(&path, &existing)
                    .await
                    .with_context(|| format!("{} failed on {}", importer.name(), path.display()))?;
                extracted.extend(entries);
            }

            println!("{}", serde_json::to_string_pretty(&extracted)?);
            Ok(())
        }
    }
}
