//! Neon app CSV exports: date;amount;description, always CHF.

use crate::config::StatementConfig;
use crate::error::Result;
use crate::importer::{Importer, file_name};
use crate::model::{Amount, Entry, Posting, Transaction};
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use std::path::Path;
use tracing::warn;

pub struct NeonImporter {
    pattern: Regex,
    account: String,
}

impl NeonImporter {
    pub fn new(config: &StatementConfig) -> Result<Self> {
        Ok(NeonImporter {
            pattern: Regex::new(&config.pattern)
                .map_err(|e| crate::error::ImportError::Parse(e.to_string()))?,
            account: config.account.clone(),
        })
    }
}

#[async_trait]
impl Importer for NeonImporter {
    fn name(&self) -> &str {
        "neon"
    }

    fn identify(&self, path: &Path) -> bool {
        self.pattern.is_match(file_name(path))
    }

    fn account(&self, _path: &Path) -> String {
        self.account.clone()
    }

    async fn extract(&self, path: &Path, _existing: &[Entry]) -> Result<Vec<Entry>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            let date_raw = record.get(0).unwrap_or("").trim();
            let amount_raw = record.get(1).unwrap_or("").trim();
            let description = record.get(2).unwrap_or("").trim();

            let book_date = match NaiveDate::parse_from_str(date_raw, "%Y-%m-%d") {
                Ok(date) => date,
                Err(e) => {
                    warn!(row = ?record, "skipping row with bad date: {e}");
                    continue;
                }
            };
            let number: Decimal = match amount_raw.parse() {
                Ok(number) => number,
                Err(e) => {
                    warn!(row = ?record, "skipping row with bad amount: {e}");
                    continue;
                }
            };

            entries.push(Entry::Transaction(Transaction::cleared(
                book_date,
                description,
                vec![Posting::new(
                    self.account.clone(),
                    Amount::new(number, "CHF"),
                )],
            )));
        }

        Ok(entries)
    }
}
