//! Error taxonomy for importer runs.
//!
//! Fatal conditions (unreconcilable totals, failed upstream calls) get
//! their own variants so callers can tell them apart from recoverable
//! per-row problems, which importers log and skip locally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("YAML config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP service error {status}: {body}")]
    HttpService { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Reconciliation failure: {0}")]
    Reconciliation(String),

    #[error("No price for {instrument} in {base} on or around {date}")]
    MissingPrice {
        instrument: String,
        base: String,
        date: chrono::NaiveDate,
    },
}

pub type Result<T> = std::result::Result<T, ImportError>;
