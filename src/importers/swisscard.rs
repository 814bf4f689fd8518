//! Swisscard cashback credit-card CSV exports.
//!
//! Header-addressed columns; charge amounts are positive in the export
//! and must be sign-inverted for the liability account.

use crate::config::StatementConfig;
use crate::error::{ImportError, Result};
use crate::importer::{Importer, file_name};
use crate::model::{Amount, Entry, Meta, Posting, Transaction};
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use std::path::Path;
use tracing::warn;

pub struct SwisscardImporter {
    pattern: Regex,
    account: String,
}

impl SwisscardImporter {
    pub fn new(config: &StatementConfig) -> Result<Self> {
        Ok(SwisscardImporter {
            pattern: Regex::new(&config.pattern)
                .map_err(|e| ImportError::Parse(e.to_string()))?,
            account: config.account.clone(),
        })
    }
}

#[async_trait]
impl Importer for SwisscardImporter {
    fn name(&self) -> &str {
        "swisscard"
    }

    fn identify(&self, path: &Path) -> bool {
        self.pattern.is_match(file_name(path))
    }

    fn account(&self, _path: &Path) -> String {
        self.account.clone()
    }

    async fn extract(&self, path: &Path, _existing: &[Entry]) -> Result<Vec<Entry>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let column = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| ImportError::Parse(format!("missing column {name}")))
        };
        let idx_date = column("Transaction date")?;
        let idx_description = column("Description")?;
        let idx_amount = column("Amount")?;
        let idx_currency = column("Currency")?;
        let idx_category = column("Category")?;

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("").trim();

            let parsed = (|| {
                let date = NaiveDate::parse_from_str(field(idx_date), "%d.%m.%Y")?;
                let number: Decimal = field(idx_amount).parse()?;
                Ok::<_, anyhow::Error>((date, number))
            })();
            let (book_date, number) = match parsed {
                Ok(values) => values,
                Err(e) => {
                    warn!(row = ?record, "skipping unparseable row: {e}");
                    continue;
                }
            };

            let mut meta = Meta::new();
            meta.insert("category".to_string(), field(idx_category).to_string());

            entries.push(Entry::Transaction(
                Transaction::cleared(
                    book_date,
                    field(idx_description),
                    vec![Posting::new(
                        self.account.clone(),
                        Amount::new(-number, field(idx_currency)),
                    )],
                )
                .with_meta(meta),
            ));
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[tokio::test]
    async fn amounts_are_sign_inverted() {
        let sample = "\
Transaction date,Description,Card number,Currency,Amount,Debit/Credit,Status,Category\n\
03.06.2024,RESTAURANT HELVETIA,XXXX 1234,CHF,45.80,Debit,Posted,dining\n\
01.06.2024,CASHBACK,XXXX 1234,CHF,-12.00,Credit,Posted,rewards\n";

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swisscard-2024-06.csv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(sample.as_bytes())
            .unwrap();

        let importer = SwisscardImporter::new(&StatementConfig {
            pattern: r"swisscard.*\.csv".to_string(),
            account: "Liabilities:Swisscard".to_string(),
        })
        .unwrap();

        let entries = importer.extract(&path, &[]).await.unwrap();
        assert_eq!(entries.len(), 2);

        let Entry::Transaction(charge) = &entries[0] else {
            panic!("expected transaction");
        };
        assert_eq!(
            charge.postings[0].units.as_ref().unwrap().number,
            dec!(-45.80)
        );
        assert_eq!(charge.meta.get("category").map(String::as_str), Some("dining"));

        let Entry::Transaction(cashback) = &entries[1] else {
            panic!("expected transaction");
        };
        assert_eq!(
            cashback.postings[0].units.as_ref().unwrap().number,
            dec!(12.00)
        );
    }
}
