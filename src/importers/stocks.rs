//! Dividend events declared in a `dividend.yaml` sidecar.
//!
//! Custody statements sometimes report a dividend only as one aggregate
//! payout for the whole position, while locally the position is spread
//! over several investment accounts. The sidecar carries the reported
//! totals; the holdings entitled to the payout are read from the ledger
//! as of the ex-date and the totals are prorated across them.

use crate::config::load_sidecar;
use crate::dividend::{
    DividendAccounts, DividendEvent, allocate, allocation_transaction, holdings_before,
};
use crate::error::Result;
use crate::importer::{Importer, file_name};
use crate::model::Entry;
use crate::prices::{MissingPricePolicy, PriceLookup};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct DividendConfig {
    pub asset: String,
    pub currency: String,
    /// Entitlement cutoff; holdings are counted strictly before this day.
    pub ex_date: NaiveDate,
    pub pay_date: NaiveDate,
    pub total_dividend: Decimal,
    pub total_withholding: Decimal,
    pub total_quantity: Decimal,
    pub base_ccy: String,
    #[serde(default)]
    pub missing_price: MissingPricePolicy,
}

/// Derives the sibling accounts from the holding account itself,
/// `Assets:<root>:Investment:<...>:<asset>`.
struct InvestmentAccounts {
    asset: String,
    base_ccy: String,
}

fn account_root(asset_account: &str) -> &str {
    asset_account
        .strip_prefix("Assets:")
        .unwrap_or(asset_account)
        .split(':')
        .next()
        .unwrap_or(asset_account)
}

impl DividendAccounts for InvestmentAccounts {
    fn liquidity_account(&self, asset_account: &str, _currency: &str) -> String {
        asset_account
            .replace(":Investment:", ":Liquidity:")
            .replace(&format!(":{}", self.asset), &format!(":{}", self.base_ccy))
    }

    fn receivable_account(&self, asset_account: &str) -> String {
        format!(
            "Assets:{}:Receivable:Verrechnungssteuer",
            account_root(asset_account)
        )
    }

    fn income_account(&self, asset_account: &str) -> String {
        format!("Income:{}:Interest", account_root(asset_account))
    }
}

pub struct StocksDividendImporter;

#[async_trait]
impl Importer for StocksDividendImporter {
    fn name(&self) -> &str {
        "stocks-dividend"
    }

    fn identify(&self, path: &Path) -> bool {
        file_name(path).ends_with("dividend.yaml")
    }

    #[instrument(name = "DividendExtract", skip(self, existing))]
    async fn extract(&self, path: &Path, existing: &[Entry]) -> Result<Vec<Entry>> {
        let config: DividendConfig = load_sidecar(path)?;
        let prices =
            PriceLookup::with_policy(existing, config.base_ccy.clone(), config.missing_price);

        let event = DividendEvent {
            asset: config.asset.clone(),
            currency: config.currency.clone(),
            pay_date: config.pay_date,
            total_dividend: config.total_dividend,
            total_withholding: config.total_withholding,
            total_quantity: config.total_quantity,
        };
        let holdings = holdings_before(existing, &config.asset, config.ex_date);
        let allocations = allocate(&event, &holdings)?;

        let accounts = InvestmentAccounts {
            asset: config.asset,
            base_ccy: config.base_ccy,
        };
        allocations
            .iter()
            .map(|allocation| {
                allocation_transaction(&event, allocation, &accounts, &prices)
                    .map(Entry::Transaction)
            })
            .collect()
    }
}
