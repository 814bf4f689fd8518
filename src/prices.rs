//! Historical exchange-rate resolution from previously recorded Price
//! entries.
//!
//! The map carries both directions of every recorded pair (the inverse
//! rate is synthesized), mirroring how the host ledger builds its price
//! map. Lookups prefer the latest rate on or before the requested date
//! and fall forward to the earliest later rate when the history starts
//! after it.

use crate::error::{ImportError, Result};
use crate::model::{Amount, Entry};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// What to do when an instrument has no price history at all. Silently
/// assuming parity corrupts cost bases, so `Error` is the default and
/// `Identity` must be opted into per importer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPricePolicy {
    #[default]
    Error,
    Identity,
}

pub struct PriceLookup {
    base_ccy: String,
    policy: MissingPricePolicy,
    // (instrument, quote ccy) -> rates sorted by date
    rates: HashMap<(String, String), Vec<(NaiveDate, Decimal)>>,
}

impl PriceLookup {
    pub fn new(existing: &[Entry], base_ccy: impl Into<String>) -> Self {
        Self::with_policy(existing, base_ccy, MissingPricePolicy::Error)
    }

    pub fn with_policy(
        existing: &[Entry],
        base_ccy: impl Into<String>,
        policy: MissingPricePolicy,
    ) -> Self {
        let mut rates: HashMap<(String, String), Vec<(NaiveDate, Decimal)>> = HashMap::new();
        for entry in existing {
            if let Entry::Price(price) = entry {
                if price.amount.number.is_zero() {
                    continue;
                }
                rates
                    .entry((price.currency.clone(), price.amount.currency.clone()))
                    .or_default()
                    .push((price.date, price.amount.number));
                rates
                    .entry((price.amount.currency.clone(), price.currency.clone()))
                    .or_default()
                    .push((price.date, Decimal::ONE / price.amount.number));
            }
        }
        for series in rates.values_mut() {
            series.sort_by_key(|(date, _)| *date);
        }

        PriceLookup {
            base_ccy: base_ccy.into(),
            policy,
            rates,
        }
    }

    pub fn base_ccy(&self) -> &str {
        &self.base_ccy
    }

    /// Rate of `instrument` in the base currency as of `date`, or `None`
    /// when the instrument is the base currency itself.
    pub fn fetch_price(&self, instrument: &str, date: NaiveDate) -> Result<Option<Amount>> {
        if instrument == self.base_ccy {
            return Ok(None);
        }

        Ok(Some(Amount::new(
            self.fetch_price_amount(instrument, date)?,
            self.base_ccy.clone(),
        )))
    }

    pub fn fetch_price_amount(&self, instrument: &str, date: NaiveDate) -> Result<Decimal> {
        if instrument == self.base_ccy {
            return Ok(Decimal::ONE);
        }

        let series = self
            .rates
            .get(&(instrument.to_string(), self.base_ccy.clone()))
            .filter(|series| !series.is_empty());

        let Some(series) = series else {
            return match self.policy {
                MissingPricePolicy::Identity => {
                    debug!(instrument, %date, "no price history, assuming identity rate");
                    Ok(Decimal::ONE)
                }
                MissingPricePolicy::Error => Err(ImportError::MissingPrice {
                    instrument: instrument.to_string(),
                    base: self.base_ccy.clone(),
                    date,
                }),
            };
        };

        // Latest on or before, else the earliest afterwards.
        let rate = series
            .iter()
            .rev()
            .find(|(d, _)| *d <= date)
            .or_else(|| series.first())
            .map(|(_, rate)| *rate)
            .expect("series is non-empty");
        Ok(rate)
    }
}
