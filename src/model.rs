//! Ledger entry model shared by all importers.
//!
//! Entries are write-once: an importer constructs them and hands them to
//! the host ingestion tool, which owns balancing, deduplication and
//! persistence. The model round-trips through JSON so the host can pass
//! previously recorded entries back in.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provenance metadata, e.g. a source-system transaction reference.
pub type Meta = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Amount {
    pub number: Decimal,
    pub currency: String,
}

impl Amount {
    pub fn new(number: Decimal, currency: impl Into<String>) -> Self {
        Amount {
            number,
            currency: currency.into(),
        }
    }
}

/// Acquisition price attached to a posting for lot tracking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cost {
    pub number: Decimal,
    pub currency: String,
}

/// One leg of a transaction. `units` is `None` for the implicit leg the
/// host ledger computes to make the transaction balance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Posting {
    pub account: String,
    pub units: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Amount>,
}

impl Posting {
    pub fn new(account: impl Into<String>, units: Amount) -> Self {
        Posting {
            account: account.into(),
            units: Some(units),
            cost: None,
            price: None,
        }
    }

    /// Implicit leg, amount left for the host ledger to infer.
    pub fn implicit(account: impl Into<String>) -> Self {
        Posting {
            account: account.into(),
            units: None,
            cost: None,
            price: None,
        }
    }

    pub fn with_cost(mut self, cost: Cost) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_price(mut self, price: Amount) -> Self {
        self.price = Some(price);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
    pub date: NaiveDate,
    pub flag: char,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payee: String,
    pub narration: String,
    pub postings: Vec<Posting>,
}

impl Transaction {
    /// Cleared single-purpose transaction, the common case.
    pub fn cleared(date: NaiveDate, narration: impl Into<String>, postings: Vec<Posting>) -> Self {
        Transaction {
            meta: Meta::new(),
            date,
            flag: '*',
            payee: String::new(),
            narration: narration.into(),
            postings,
        }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_payee(mut self, payee: impl Into<String>) -> Self {
        self.payee = payee.into();
        self
    }
}

/// Asserted account balance as of a date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceAssertion {
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
    pub date: NaiveDate,
    pub account: String,
    pub amount: Amount,
}

/// Exchange rate of `currency` expressed in `amount.currency` as of `date`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Price {
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
    pub date: NaiveDate,
    pub currency: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    Transaction(Transaction),
    Balance(BalanceAssertion),
    Price(Price),
}

impl Entry {
    pub fn date(&self) -> NaiveDate {
        match self {
            Entry::Transaction(t) => t.date,
            Entry::Balance(b) => b.date,
            Entry::Price(p) => p.date,
        }
    }

    pub fn meta(&self) -> &Meta {
        match self {
            Entry::Transaction(t) => &t.meta,
            Entry::Balance(b) => &b.meta,
            Entry::Price(p) => &p.meta,
        }
    }
}
