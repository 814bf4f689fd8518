//! Proportional dividend / withholding-tax allocation across holding
//! accounts.
//!
//! A source system reports one aggregate payout and withholding amount per
//! dividend event. Locally the position may be spread over several
//! accounts, so the totals are split by the quantity each account held
//! before the ex-date. Per-row shares are rounded to 2 decimal places and
//! the last row absorbs the remainders, so the emitted amounts always sum
//! exactly to the reported totals.

use crate::error::{ImportError, Result};
use crate::model::{Amount, Entry, Meta, Posting, Transaction};
use crate::prices::PriceLookup;
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;

/// Quantity of a security held in one account as of a cutoff date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldingRow {
    pub account: String,
    pub quantity: Decimal,
}

/// One dividend event as reported by the source system, for the
/// aggregate position.
#[derive(Debug, Clone)]
pub struct DividendEvent {
    pub asset: String,
    pub currency: String,
    pub pay_date: NaiveDate,
    pub total_dividend: Decimal,
    pub total_withholding: Decimal,
    /// Externally reported total quantity; must match the sum of the
    /// queried holdings or the whole run aborts.
    pub total_quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub account: String,
    pub payout: Decimal,
    pub withholding: Decimal,
    pub quantity: Decimal,
}

/// Sum posting quantities of `asset` per account over entries dated
/// strictly before `cutoff`. Iteration order is deterministic (sorted by
/// account); closed positions are dropped.
pub fn holdings_before(existing: &[Entry], asset: &str, cutoff: NaiveDate) -> Vec<HoldingRow> {
    let mut by_account: BTreeMap<String, Decimal> = BTreeMap::new();
    for entry in existing {
        let Entry::Transaction(trx) = entry else {
            continue;
        };
        if trx.date >= cutoff {
            continue;
        }
        for posting in &trx.postings {
            if let Some(units) = &posting.units {
                if units.currency == asset {
                    *by_account.entry(posting.account.clone()).or_default() += units.number;
                }
            }
        }
    }

    by_account
        .into_iter()
        .filter(|(_, quantity)| quantity.is_sign_positive() && !quantity.is_zero())
        .map(|(account, quantity)| HoldingRow { account, quantity })
        .collect()
}

/// Split the event's payout and withholding across `holdings` by
/// quantity-weighted share.
///
/// Every row except the last gets its share rounded to 2 decimal places;
/// the last row gets whatever remains, concentrating the rounding
/// remainder there so the totals reconcile exactly.
pub fn allocate(event: &DividendEvent, holdings: &[HoldingRow]) -> Result<Vec<Allocation>> {
    if holdings.is_empty() {
        return Err(ImportError::Reconciliation(format!(
            "no holdings of {} before the cutoff, but a dividend was reported",
            event.asset
        )));
    }

    let held: Decimal = holdings.iter().map(|row| row.quantity).sum();
    if held != event.total_quantity {
        return Err(ImportError::Reconciliation(format!(
            "holdings of {} sum to {} but the source reported {}",
            event.asset, held, event.total_quantity
        )));
    }

    let total_payout = event.total_dividend - event.total_withholding;
    let mut remaining_payout = total_payout;
    let mut remaining_withholding = event.total_withholding;

    let round2 =
        |number: Decimal| number.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);

    let mut allocations = Vec::with_capacity(holdings.len());
    for row in &holdings[..holdings.len() - 1] {
        let payout = round2(total_payout * row.quantity / event.total_quantity);
        let withholding = round2(event.total_withholding * row.quantity / event.total_quantity);
        remaining_payout -= payout;
        remaining_withholding -= withholding;
        allocations.push(Allocation {
            account: row.account.clone(),
            payout,
            withholding,
            quantity: row.quantity,
        });
    }

    let last = holdings.last().expect("holdings is non-empty");
    allocations.push(Allocation {
        account: last.account.clone(),
        payout: remaining_payout,
        withholding: remaining_withholding,
        quantity: last.quantity,
    });

    Ok(allocations)
}

/// Account derivation hooks for the transactions synthesized from an
/// allocation. The defaults follow the investment-account layout of the
/// original statements (`Assets:<root>:Investment:...`).
pub trait DividendAccounts {
    fn liquidity_account(&self, asset_account: &str, currency: &str) -> String;
    fn receivable_account(&self, asset_account: &str) -> String;
    fn income_account(&self, asset_account: &str) -> String;
}

/// Render one allocation as a ledger transaction: a zero-quantity anchor
/// posting on the holding account, the payout on the liquidity account
/// priced in the base currency, the withholding on the tax receivable when
/// positive, and an implicit income leg for the host to balance.
pub fn allocation_transaction(
    event: &DividendEvent,
    allocation: &Allocation,
    accounts: &dyn DividendAccounts,
    prices: &PriceLookup,
) -> Result<Transaction> {
    let asset_account = &allocation.account;
    let price = prices.fetch_price(&event.currency, event.pay_date)?;

    let mut postings = vec![
        Posting::new(
            asset_account.clone(),
            Amount::new(Decimal::ZERO, event.asset.clone()),
        ),
        {
            let mut posting = Posting::new(
                accounts.liquidity_account(asset_account, &event.currency),
                Amount::new(allocation.payout, event.currency.clone()),
            );
            if let Some(price) = price {
                posting = posting.with_price(price);
            }
            posting
        },
    ];
    if allocation.withholding > Decimal::ZERO {
        postings.push(Posting::new(
            accounts.receivable_account(asset_account),
            Amount::new(allocation.withholding, event.currency.clone()),
        ));
    }
    postings.push(Posting::implicit(accounts.income_account(asset_account)));

    let mut meta = Meta::new();
    meta.insert("asset".to_string(), event.asset.clone());
    Ok(Transaction::cleared(
        event.pay_date,
        format!("Dividend for {}", allocation.quantity),
        postings,
    )
    .with_meta(meta))
}
