//! Application configuration.
//!
//! Statement-file importers (CSV, MT940) are instantiated from typed
//! config entries; everything is validated when the YAML is loaded, not
//! looked up by key at extraction time. Credentialed importers configure
//! themselves from sidecar YAML files next to the data and need no entry
//! here.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct StatementConfig {
    /// Filename regex this importer claims.
    pub pattern: String,
    pub account: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CsvConfig {
    pub pattern: String,
    pub account: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "CHF".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImporterSpec {
    Bcge(StatementConfig),
    Zkb(StatementConfig),
    Revolut(CsvConfig),
    Neon(StatementConfig),
    Swisscard(StatementConfig),
    Postfinance(CsvConfig),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub importers: Vec<ImporterSpec>,
}

impl AppConfig {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}

/// Loads a typed sidecar configuration file (`*.nordigen.yaml`,
/// `*.ibkr.yaml`, ...) colocated with the data.
pub fn load_sidecar<T: serde::de::DeserializeOwned>(path: &Path) -> crate::error::Result<T> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes_typed_importers() {
        let yaml_str = r#"
importers:
  - type: bcge
    pattern: "bcge.*\\.mt940"
    account: "Assets:BCGE:Checking"
  - type: revolut
    pattern: "revolut.*\\.csv"
    account: "Assets:Revolut:CHF"
    currency: "CHF"
  - type: postfinance
    pattern: "postfinance.*\\.csv"
    account: "Assets:PostFinance:Checking"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.importers.len(), 3);
        match &config.importers[0] {
            ImporterSpec::Bcge(mt) => assert_eq!(mt.account, "Assets:BCGE:Checking"),
            other => panic!("Expected bcge, got {other:?}"),
        }
        match &config.importers[2] {
            // currency falls back to CHF
            ImporterSpec::Postfinance(csv) => assert_eq!(csv.currency, "CHF"),
            other => panic!("Expected postfinance, got {other:?}"),
        }
    }

    #[test]
    fn unknown_importer_type_is_rejected() {
        let yaml_str = r#"
importers:
  - type: carrier_pigeon
    pattern: ".*"
    account: "Assets:Unknown"
"#;
        assert!(serde_yaml::from_str::<AppConfig>(yaml_str).is_err());
    }
}
