//! The importer catalog.
//!
//! Statement-file importers (MT940, CSV) are instantiated from the typed
//! configuration; credentialed and sidecar-driven importers are always
//! registered and claim their own `*.yaml` trigger files.

pub mod bcge;
pub mod ibkr;
pub mod mt940_base;
pub mod neon;
pub mod nordigen;
pub mod postfinance;
pub mod revolut;
pub mod schedule;
pub mod stocks;
pub mod swisscard;
pub mod truelayer;
pub mod zkb;

use crate::config::{AppConfig, ImporterSpec, StatementConfig};
use crate::error::{ImportError, Result};
use crate::importer::Importer;
use regex::Regex;

use bcge::BcgeFormatter;
use ibkr::IbkrImporter;
use mt940_base::{Mt940Formatter, Mt940Importer};
use neon::NeonImporter;
use nordigen::NordigenImporter;
use postfinance::PostfinanceImporter;
use revolut::RevolutImporter;
use schedule::ScheduleImporter;
use stocks::StocksDividendImporter;
use swisscard::SwisscardImporter;
use truelayer::TruelayerImporter;
use zkb::ZkbFormatter;

fn mt940<F: Mt940Formatter + Send + Sync + 'static>(
    name: &'static str,
    config: &StatementConfig,
    formatter: F,
) -> Result<Mt940Importer<F>> {
    let pattern =
        Regex::new(&config.pattern).map_err(|e| ImportError::Parse(e.to_string()))?;
    Ok(Mt940Importer::new(name, pattern, config.account.clone(), formatter))
}

/// Builds the full catalog for a configuration. Invalid filename
/// patterns fail here, before any file is touched.
pub fn build_importers(config: &AppConfig) -> Result<Vec<Box<dyn Importer>>> {
    let mut importers: Vec<Box<dyn Importer>> = Vec::new();
    for spec in &config.importers {
        importers.push(match spec {
            ImporterSpec::Bcge(mt) => Box::new(mt940("bcge", mt, BcgeFormatter)?),
            ImporterSpec::Zkb(mt) => Box::new(mt940("zkb", mt, ZkbFormatter)?),
            ImporterSpec::Revolut(csv) => Box::new(RevolutImporter::new(csv)?),
            ImporterSpec::Neon(mt) => Box::new(NeonImporter::new(mt)?),
            ImporterSpec::Swisscard(mt) => Box::new(SwisscardImporter::new(mt)?),
            ImporterSpec::Postfinance(csv) => Box::new(PostfinanceImporter::new(csv)?),
        });
    }

    // Sidecar-driven importers need no configuration entry.
    importers.push(Box::new(NordigenImporter));
    importers.push(Box::new(TruelayerImporter));
    importers.push(Box::new(IbkrImporter));
    importers.push(Box::new(StocksDividendImporter));
    importers.push(Box::new(ScheduleImporter));
    Ok(importers)
}
