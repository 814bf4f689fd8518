//! PostFinance CSV exports.
//!
//! The export is Windows-1252 encoded, semicolon delimited, with a
//! trailing balance column. A balance assertion is only emitted when the
//! day after the booking date falls on the first of a month, matching how
//! the statement snapshots month boundaries.

use crate::config::CsvConfig;
use crate::error::{ImportError, Result};
use crate::importer::{Importer, file_name};
use crate::model::{Amount, BalanceAssertion, Entry, Meta, Posting, Transaction};
use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate};
use encoding_rs::WINDOWS_1252;
use regex::Regex;
use rust_decimal::Decimal;
use std::path::Path;
use tracing::debug;

pub struct PostfinanceImporter {
    pattern: Regex,
    account: String,
    currency: String,
}

impl PostfinanceImporter {
    pub fn new(config: &CsvConfig) -> Result<Self> {
        Ok(PostfinanceImporter {
            pattern: Regex::new(&config.pattern)
                .map_err(|e| ImportError::Parse(e.to_string()))?,
            account: config.account.clone(),
            currency: config.currency.clone(),
        })
    }
}

#[async_trait]
impl Importer for PostfinanceImporter {
    fn name(&self) -> &str {
        "postfinance"
    }

    fn identify(&self, path: &Path) -> bool {
        self.pattern.is_match(file_name(path))
    }

    fn account(&self, _path: &Path) -> String {
        self.account.clone()
    }

    async fn extract(&self, path: &Path, _existing: &[Entry]) -> Result<Vec<Entry>> {
        let raw = std::fs::read(path)?;
        let (decoded, _, _) = WINDOWS_1252.decode(&raw);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_reader(decoded.as_bytes());

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("").trim();

            // book_date;text;credit;debit;value_date;balance — anything
            // else (headers, disclaimers) simply fails to parse
            let Ok(book_date) = NaiveDate::parse_from_str(field(0), "%Y-%m-%d") else {
                debug!(row = ?record, "skipping non-transaction row");
                continue;
            };
            let text = field(1);
            let number: Option<Decimal> = if !field(2).is_empty() {
                field(2).parse().ok()
            } else if !field(3).is_empty() {
                field(3).parse().ok()
            } else {
                None
            };
            let Some(number) = number else {
                debug!(row = ?record, "skipping row without amount");
                continue;
            };

            entries.push(Entry::Transaction(Transaction::cleared(
                book_date,
                text,
                vec![Posting::new(
                    self.account.clone(),
                    Amount::new(number, self.currency.clone()),
                )],
            )));

            // only assert the balance on month boundaries
            let assertion_date = book_date + Days::new(1);
            if assertion_date.day() == 1 {
                if let Ok(balance) = field(5).parse::<Decimal>() {
                    entries.push(Entry::Balance(BalanceAssertion {
                        meta: Meta::new(),
                        date: assertion_date,
                        account: self.account.clone(),
                        amount: Amount::new(balance, self.currency.clone()),
                    }));
                }
            }
        }

        entries.sort_by_key(Entry::date);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn importer() -> PostfinanceImporter {
        PostfinanceImporter::new(&CsvConfig {
            pattern: r"postfinance.*\.csv".to_string(),
            account: "Assets:PostFinance:Checking".to_string(),
            currency: "CHF".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn decodes_windows_1252_and_sorts() {
        // "Überweisung" encoded as Windows-1252 (0xDC for Ü)
        let mut sample: Vec<u8> = Vec::new();
        sample.extend_from_slice(b"Datum;Text;Gutschrift;Lastschrift;Valuta;Saldo\n");
        sample.extend_from_slice(b"2024-05-31;\xDCberweisung;;-120.00;2024-05-31;2380.00\n");
        sample.extend_from_slice(b"2024-05-02;Einkauf;;-20.00;2024-05-02;2500.00\n");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postfinance-mai.csv");
        std::fs::File::create(&path).unwrap().write_all(&sample).unwrap();

        let entries = importer().extract(&path, &[]).await.unwrap();
        // 2 transactions plus the month-boundary balance from 2024-05-31
        assert_eq!(entries.len(), 3);

        let Entry::Transaction(first) = &entries[0] else {
            panic!("expected transaction");
        };
        assert_eq!(first.narration, "Einkauf");

        let Entry::Transaction(transfer) = &entries[1] else {
            panic!("expected transaction");
        };
        assert_eq!(transfer.narration, "Überweisung");
        assert_eq!(
            transfer.postings[0].units.as_ref().unwrap().number,
            dec!(-120.00)
        );

        let Entry::Balance(balance) = &entries[2] else {
            panic!("expected month-boundary balance");
        };
        assert_eq!(balance.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(balance.amount.number, dec!(2380.00));
    }

    #[tokio::test]
    async fn mid_month_rows_do_not_assert_balance() {
        let sample = b"2024-05-14;Miete;;-1500.00;2024-05-14;1000.00\n".to_vec();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postfinance.csv");
        std::fs::File::create(&path).unwrap().write_all(&sample).unwrap();

        let entries = importer().extract(&path, &[]).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0], Entry::Transaction(_)));
    }
}
