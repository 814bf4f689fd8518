//! Generic importer for MT940 statement files.
//!
//! Banks differ only in how they bury payee and narration inside the
//! `:86:` and supplementary text, so that part is a hook trait and the
//! rest is shared.

use crate::error::Result;
use crate::importer::{Importer, file_name};
use crate::model::{Amount, Entry, Meta, Posting, Transaction};
use crate::mt940::{self, Mt940Transaction};
use async_trait::async_trait;
use regex::Regex;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub trait Mt940Formatter: Send + Sync {
    fn payee(&self, _trx: &Mt940Transaction) -> String {
        String::new()
    }

    fn narration(&self, trx: &Mt940Transaction) -> String {
        format!("{} {}", trx.transaction_details, trx.extra_details)
            .trim()
            .to_string()
    }
}

/// Plain MT940 with no bank-specific cleanup.
pub struct PlainFormatter;

impl Mt940Formatter for PlainFormatter {}

pub struct Mt940Importer<F> {
    name: &'static str,
    pattern: Regex,
    account: String,
    formatter: F,
}

impl<F: Mt940Formatter> Mt940Importer<F> {
    pub fn new(name: &'static str, pattern: Regex, account: String, formatter: F) -> Self {
        Mt940Importer {
            name,
            pattern,
            account,
            formatter,
        }
    }
}

#[async_trait]
impl<F: Mt940Formatter> Importer for Mt940Importer<F> {
    fn name(&self) -> &str {
        self.name
    }

    fn identify(&self, path: &Path) -> bool {
        self.pattern.is_match(file_name(path))
    }

    fn account(&self, _path: &Path) -> String {
        self.account.clone()
    }

    async fn extract(&self, path: &Path, _existing: &[Entry]) -> Result<Vec<Entry>> {
        let statement = mt940::parse(BufReader::new(File::open(path)?))?;

        let mut entries = Vec::with_capacity(statement.transactions.len());
        for trx in &statement.transactions {
            let mut meta = Meta::new();
            if let Some(reference) = &trx.bank_reference {
                meta.insert("ref".to_string(), reference.clone());
            }

            let date = trx.entry_date.unwrap_or(trx.date);
            let entry = Transaction::cleared(
                date,
                self.formatter.narration(trx),
                vec![Posting::new(
                    self.account.clone(),
                    Amount::new(trx.amount, trx.currency.clone()),
                )],
            )
            .with_meta(meta)
            .with_payee(self.formatter.payee(trx));
            entries.push(Entry::Transaction(entry));
        }

        Ok(entries)
    }
}
