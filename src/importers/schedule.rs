//! Recurring transactions declared in a `schedule.yaml` sidecar.
//!
//! Each configured template is instantiated on the last day of each of
//! the previous five months.

use crate::config::load_sidecar;
use crate::error::Result;
use crate::importer::{Importer, file_name};
use crate::model::{Amount, Entry, Posting, Transaction};
use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct ScheduleConfig {
    pub transactions: Vec<ScheduledTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduledTransaction {
    pub narration: String,
    pub postings: Vec<ScheduledPosting>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduledPosting {
    pub account: String,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
}

/// Last day of the month `months_back` before the month of `today`.
fn last_day_of_prior_month(today: NaiveDate, months_back: u32) -> NaiveDate {
    let months = today.year() as i32 * 12 + today.month0() as i32 - months_back as i32;
    let (year, month0) = (months.div_euclid(12), months.rem_euclid(12) as u32);
    let first_of_next = if month0 == 11 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month0 + 2, 1)
    };
    first_of_next.expect("valid first of month") - chrono::Days::new(1)
}

fn instantiate(config: &ScheduleConfig, today: NaiveDate) -> Vec<Entry> {
    let mut entries = Vec::new();
    for months_back in (1..6).rev() {
        let date = last_day_of_prior_month(today, months_back);
        for template in &config.transactions {
            let postings = template
                .postings
                .iter()
                .map(|p| match (&p.amount, &p.currency) {
                    (Some(amount), Some(currency)) => {
                        Posting::new(p.account.clone(), Amount::new(*amount, currency.clone()))
                    }
                    _ => Posting::implicit(p.account.clone()),
                })
                .collect();
            entries.push(Entry::Transaction(Transaction::cleared(
                date,
                template.narration.clone(),
                postings,
            )));
        }
    }
    entries
}

pub struct ScheduleImporter;

#[async_trait]
impl Importer for ScheduleImporter {
    fn name(&self) -> &str {
        "schedule"
    }

    fn identify(&self, path: &Path) -> bool {
        file_name(path).ends_with("schedule.yaml")
    }

    #[instrument(name = "ScheduleExtract", skip(self, _existing))]
    async fn extract(&self, path: &Path, _existing: &[Entry]) -> Result<Vec<Entry>> {
        let config: ScheduleConfig = load_sidecar(path)?;
        Ok(instantiate(&config, Local::now().date_naive()))
    }
}
