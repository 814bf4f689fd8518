//! Revolut transaction CSV exports.
//!
//! Semicolon delimited with exchange columns for currency conversions.
//! Minor format drift happens between exports, so rows that fail to parse
//! are logged and skipped instead of failing the run. The newest row also
//! yields a balance assertion dated one day later.

use crate::config::CsvConfig;
use crate::error::Result;
use crate::importer::{Importer, file_name};
use crate::model::{Amount, BalanceAssertion, Entry, Meta, Posting, Transaction};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use std::path::Path;
use tracing::warn;

pub struct RevolutImporter {
    pattern: Regex,
    account: String,
    currency: String,
}

impl RevolutImporter {
    pub fn new(config: &CsvConfig) -> Result<Self> {
        Ok(RevolutImporter {
            pattern: Regex::new(&config.pattern)
                .map_err(|e| crate::error::ImportError::Parse(e.to_string()))?,
            account: config.account.clone(),
            currency: config.currency.clone(),
        })
    }
}

fn parse_number(raw: &str) -> std::result::Result<Decimal, rust_decimal::Error> {
    raw.replace('\'', "").trim().parse()
}

#[async_trait]
impl Importer for RevolutImporter {
    fn name(&self) -> &str {
        "revolut"
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
        let mut has_balance = false;
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("").trim();
            let (date_raw, reference) = (field(0), field(1));
            let (paid_out, paid_in) = (field(2), field(3));
            let (exchange_out, exchange_in) = (field(4), field(5));
            let (balance_raw, category) = (field(6), field(7));

            let mut meta = Meta::new();
            meta.insert("category".to_string(), category.to_string());
            match (exchange_in.is_empty(), exchange_out.is_empty()) {
                (false, false) => {
                    meta.insert("originalIn".to_string(), exchange_in.to_string());
                    meta.insert("originalOut".to_string(), exchange_out.to_string());
                }
                (false, true) => {
                    meta.insert("original".to_string(), exchange_in.to_string());
                }
                (true, false) => {
                    meta.insert("original".to_string(), exchange_out.to_string());
                }
                (true, true) => {}
            }

            let parsed = (|| {
                let book_date = NaiveDate::parse_from_str(date_raw, "%d.%m.%Y")
                    .or_else(|_| NaiveDate::parse_from_str(date_raw, "%Y-%m-%d"))?;
                let credit = parse_number(paid_in).unwrap_or_default();
                let debit = parse_number(paid_out).unwrap_or_default();
                let balance = parse_number(balance_raw)?;
                Ok::<_, anyhow::Error>((book_date, credit - debit, balance))
            })();
            let (book_date, number, balance) = match parsed {
                Ok(values) => values,
                Err(e) => {
                    warn!(row = ?record, "skipping unparseable row: {e}");
                    continue;
                }
            };

            entries.push(Entry::Transaction(
                Transaction::cleared(
                    book_date,
                    reference,
                    vec![Posting::new(
                        self.account.clone(),
                        Amount::new(number, self.currency.clone()),
                    )],
                )
                .with_meta(meta.clone()),
            ));

            // only assert the balance after the top (newest) transaction
            if !has_balance {
                entries.push(Entry::Balance(BalanceAssertion {
                    meta,
                    date: book_date + Days::new(1),
                    account: self.account.clone(),
                    amount: Amount::new(balance, self.currency.clone()),
                }));
                has_balance = true;
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const SAMPLE: &str = "\
Date;Reference;PaidOut;PaidIn;ExchangeOut;ExchangeIn;Balance;Category\n\
15.03.2024;Grocery Store;23.50;;;;1'476.50;groceries\n\
12.03.2024;Top-Up;;500.00;EUR 520.00;;1'500.00;transfers\n\
bogus;;;;;;not-a-number;junk\n";

    fn importer() -> RevolutImporter {
        RevolutImporter::new(&CsvConfig {
            pattern: r"revolut.*\.csv".to_string(),
            account: "Assets:Revolut:CHF".to_string(),
            currency: "CHF".to_string(),
        })
        .unwrap()
    }

    async fn extract(sample: &str) -> Vec<Entry> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revolut-2024.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(sample.as_bytes()).unwrap();
        importer().extract(&path, &[]).await.unwrap()
    }

    #[tokio::test]
    async fn newest_row_adds_balance_and_bad_rows_are_skipped() {
        let entries = extract(SAMPLE).await;
        // 2 transactions + 1 balance; the bogus row is dropped
        assert_eq!(entries.len(), 3);

        let Entry::Transaction(first) = &entries[0] else {
            panic!("expected transaction first");
        };
        assert_eq!(first.narration, "Grocery Store");
        assert_eq!(
            first.postings[0].units.as_ref().unwrap().number,
            dec!(-23.50)
        );

        let Entry::Balance(balance) = &entries[1] else {
            panic!("expected balance after newest transaction");
        };
        assert_eq!(balance.amount.number, dec!(1476.50));
        assert_eq!(
            balance.date,
            NaiveDate::from_ymd_opt(2024, 3, 16).unwrap()
        );
    }

    #[tokio::test]
    async fn exchange_columns_become_metadata() {
        let entries = extract(SAMPLE).await;
        let Entry::Transaction(topup) = &entries[2] else {
            panic!("expected transaction");
        };
        assert_eq!(
            topup.meta.get("original").map(String::as_str),
            Some("EUR 520.00")
        );
        assert_eq!(
            topup.meta.get("category").map(String::as_str),
            Some("transfers")
        );
    }
}
