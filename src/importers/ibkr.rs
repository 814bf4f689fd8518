//! Interactive Brokers Flex Web Service.
//!
//! Statement download is a two-step flow: `SendRequest` answers with a
//! reference code, `GetStatement` serves the actual Flex query XML once
//! generation finishes. While the statement is still being generated the
//! service answers with error code 1019; that is the one documented
//! signal we sleep on and retry once.
//!
//! From the statement, trades become buy transactions with a cost basis
//! in the base currency, and cash transactions become dividend
//! transactions. Gross dividend and withholding tax arrive as separate
//! cash rows; they are matched up by symbol, date and the per-share
//! amount quoted in the description.

use crate::config::load_sidecar;
use crate::error::{ImportError, Result};
use crate::importer::{Importer, file_name};
use crate::model::{Amount, Cost, Entry, Meta, Posting, Transaction};
use crate::prices::PriceLookup;
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://gdcdyn.interactivebrokers.com";
const IN_PROGRESS_CODE: &str = "1019";

#[derive(Debug, Deserialize)]
pub struct IbkrConfig {
    pub token: String,
    #[serde(rename = "queryId")]
    pub query_id: String,
    #[serde(rename = "baseCcy")]
    pub base_ccy: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Wait before the single retry when the statement is still being
    /// generated.
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_retry_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct FlexStatementResponse {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "ReferenceCode", default)]
    reference_code: Option<String>,
    #[serde(rename = "ErrorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "ErrorMessage", default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlexQueryResponse {
    #[serde(rename = "FlexStatements")]
    flex_statements: FlexStatements,
}

#[derive(Debug, Deserialize)]
struct FlexStatements {
    #[serde(rename = "FlexStatement", default)]
    statements: Vec<FlexStatement>,
}

#[derive(Debug, Deserialize)]
struct FlexStatement {
    #[serde(rename = "@accountId")]
    account_id: String,
    #[serde(rename = "Trades", default)]
    trades: Option<Trades>,
    #[serde(rename = "CashTransactions", default)]
    cash_transactions: Option<CashTransactions>,
}

#[derive(Debug, Deserialize)]
struct Trades {
    #[serde(rename = "Trade", default)]
    items: Vec<Trade>,
}

#[derive(Debug, Deserialize)]
struct Trade {
    #[serde(rename = "@symbol")]
    symbol: String,
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "@quantity")]
    quantity: Decimal,
    #[serde(rename = "@tradePrice")]
    trade_price: Decimal,
    #[serde(rename = "@tradeDate")]
    trade_date: String,
    #[serde(rename = "@ibCommission")]
    ib_commission: Decimal,
    #[serde(rename = "@ibCommissionCurrency")]
    ib_commission_currency: String,
    #[serde(rename = "@netCash")]
    net_cash: Decimal,
    #[serde(rename = "@fxRateToBase")]
    fx_rate_to_base: Decimal,
}

#[derive(Debug, Deserialize)]
struct CashTransactions {
    #[serde(rename = "CashTransaction", default)]
    items: Vec<CashTransaction>,
}

#[derive(Debug, Deserialize)]
struct CashTransaction {
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "@symbol")]
    symbol: String,
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "@amount")]
    amount: Decimal,
    #[serde(rename = "@dateTime")]
    date_time: String,
    #[serde(rename = "@description")]
    description: String,
}

/// Accrued dividend and withholding rows merged per payout event.
#[derive(Debug)]
struct PendingDividend {
    date: NaiveDate,
    symbol: String,
    currency: String,
    amount: Decimal,
    wh_amount: Decimal,
    description: String,
    account: String,
}

fn per_share_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<per_share>\d+\.?\d+) PER SHARE").expect("valid per-share regex")
    })
}

fn per_share(description: &str) -> Option<&str> {
    per_share_regex()
        .captures(description)
        .and_then(|caps| caps.name("per_share"))
        .map(|m| m.as_str())
}

/// Flex dates come as `yyyyMMdd` (optionally with `;HHmmss` appended) or
/// `yyyy-MM-dd`.
fn parse_flex_date(raw: &str) -> Result<NaiveDate> {
    let date_part = raw.split(';').next().unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%Y-%m-%d"))
        .map_err(|e| ImportError::Parse(format!("bad flex date {raw}: {e}")))
}

fn round2(number: Decimal) -> Decimal {
    number.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

pub struct IbkrImporter;

impl IbkrImporter {
    async fn download(&self, client: &reqwest::Client, config: &IbkrConfig) -> Result<String> {
        let send_url = format!(
            "{}/Universal/servlet/FlexStatementService.SendRequest",
            config.base_url
        );
        let body = client
            .get(&send_url)
            .query(&[("t", config.token.as_str()), ("q", config.query_id.as_str()), ("v", "3")])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let response: FlexStatementResponse =
            quick_xml::de::from_str(&body).map_err(|e| ImportError::Xml(e.to_string()))?;
        if response.status != "Success" {
            return Err(ImportError::HttpService {
                status: 200,
                body: format!(
                    "flex request rejected ({}): {}",
                    response.error_code.unwrap_or_default(),
                    response.error_message.unwrap_or_default()
                ),
            });
        }
        let reference = response.reference_code.ok_or_else(|| {
            ImportError::Parse("flex response without reference code".to_string())
        })?;

        let get_url = format!(
            "{}/Universal/servlet/FlexStatementService.GetStatement",
            config.base_url
        );
        let mut retried = false;
        loop {
            let body = client
                .get(&get_url)
                .query(&[("t", config.token.as_str()), ("q", reference.as_str()), ("v", "3")])
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;

            if body.contains("<FlexQueryResponse") {
                return Ok(body);
            }

            let response: FlexStatementResponse =
                quick_xml::de::from_str(&body).map_err(|e| ImportError::Xml(e.to_string()))?;
            let code = response.error_code.unwrap_or_default();
            if code == IN_PROGRESS_CODE && !retried {
                warn!("statement not ready yet, retrying once in {}s", config.retry_secs);
                tokio::time::sleep(Duration::from_secs(config.retry_secs)).await;
                retried = true;
                continue;
            }
            return Err(ImportError::HttpService {
                status: 200,
                body: format!(
                    "flex statement not delivered ({code}): {}",
                    response.error_message.unwrap_or_default()
                ),
            });
        }
    }
}

#[async_trait]
impl Importer for IbkrImporter {
    fn name(&self) -> &str {
        "ibkr"
    }

    fn identify(&self, path: &Path) -> bool {
        file_name(path).ends_with("ibkr.yaml")
    }

    #[instrument(name = "IbkrExtract", skip(self, existing))]
    async fn extract(&self, path: &Path, existing: &[Entry]) -> Result<Vec<Entry>> {
        let config: IbkrConfig = load_sidecar(path)?;
        let prices = PriceLookup::new(existing, config.base_ccy.clone());

        let client = reqwest::Client::new();
        let xml = self.download(&client, &config).await?;
        let statement: FlexQueryResponse =
            quick_xml::de::from_str(&xml).map_err(|e| ImportError::Xml(e.to_string()))?;

        let mut entries = Vec::new();
        for stmt in &statement.flex_statements.statements {
            let account = &stmt.account_id;

            for trade in stmt.trades.iter().flat_map(|t| &t.items) {
                entries.push(Entry::Transaction(create_buy(trade, account, &config.base_ccy)?));
            }

            let mut pending: Vec<PendingDividend> = Vec::new();
            for trx in stmt.cash_transactions.iter().flat_map(|c| &c.items) {
                let is_dividend = trx.kind == "Dividends";
                let is_whtax = trx.kind == "Withholding Tax";
                if !is_dividend && !is_whtax {
                    debug!(kind = %trx.kind, "ignoring cash transaction type");
                    continue;
                }

                let date = parse_flex_date(&trx.date_time)?;
                let matched = pending.iter_mut().find(|p| {
                    p.date == date
                        && p.symbol == trx.symbol
                        && p.account == *account
                        && per_share(&p.description) == per_share(&trx.description)
                });

                if let Some(event) = matched {
                    if is_whtax {
                        event.wh_amount += trx.amount;
                    } else {
                        event.amount += trx.amount;
                        event.description = trx.description.clone();
                    }
                } else {
                    let (amount, wh_amount) = if is_whtax {
                        (Decimal::ZERO, trx.amount)
                    } else {
                        (trx.amount, Decimal::ZERO)
                    };
                    pending.push(PendingDividend {
                        date,
                        symbol: trx.symbol.clone(),
                        currency: trx.currency.clone(),
                        amount,
                        wh_amount,
                        description: trx.description.clone(),
                        account: account.clone(),
                    });
                }
            }

            for event in pending.iter().filter(|p| !p.amount.is_zero()) {
                entries.push(Entry::Transaction(create_dividend(event, &prices)?));
            }
        }

        Ok(entries)
    }
}

fn asset_account(account: &str, asset: &str) -> String {
    format!("Assets:{account}:Investment:IB:{asset}")
}

fn liquidity_account(account: &str, currency: &str) -> String {
    format!("Assets:{account}:Liquidity:IB:{currency}")
}

fn receivable_account(account: &str) -> String {
    format!("Assets:{account}:Receivable:Verrechnungssteuer")
}

fn income_account(account: &str) -> String {
    format!("Income:{account}:Interest")
}

fn fee_account(account: &str) -> String {
    format!("Expenses:{account}:Fees")
}

fn create_buy(trade: &Trade, account: &str, base_ccy: &str) -> Result<Transaction> {
    let date = parse_flex_date(&trade.trade_date)?;
    // synthetic suffix on some european listings
    let asset = trade.symbol.trim_end_matches('z');

    let mut price = trade.trade_price;
    let mut commission = Amount::new(round2(-trade.ib_commission), trade.ib_commission_currency.clone());
    let mut liquidity_price = None;
    if trade.currency != base_ccy {
        price *= trade.fx_rate_to_base;
        commission = Amount::new(
            round2(commission.number * trade.fx_rate_to_base),
            base_ccy.to_string(),
        );
        liquidity_price = Some(Amount::new(trade.fx_rate_to_base, base_ccy.to_string()));
    }

    let mut liquidity = Posting::new(
        liquidity_account(account, &trade.currency),
        Amount::new(round2(trade.net_cash), trade.currency.clone()),
    );
    if let Some(price) = liquidity_price {
        liquidity = liquidity.with_price(price);
    }

    let mut meta = Meta::new();
    meta.insert("account".to_string(), account.to_string());
    Ok(Transaction::cleared(
        date,
        "Buy",
        vec![
            Posting::new(
                asset_account(account, asset),
                Amount::new(trade.quantity, asset.to_string()),
            )
            .with_cost(Cost {
                number: price,
                currency: base_ccy.to_string(),
            }),
            Posting::new(fee_account(account), commission),
            liquidity,
        ],
    )
    .with_meta(meta))
}

fn create_dividend(event: &PendingDividend, prices: &PriceLookup) -> Result<Transaction> {
    let asset = event.symbol.trim_end_matches('z');
    let total_dividend = event.amount;
    let total_withholding = -event.wh_amount;
    let payout = total_dividend - total_withholding;

    let price = prices.fetch_price(&event.currency, event.date)?;

    let mut liquidity = Posting::new(
        liquidity_account(&event.account, &event.currency),
        Amount::new(payout, event.currency.clone()),
    );
    if let Some(price) = price {
        liquidity = liquidity.with_price(price);
    }

    let mut postings = vec![
        Posting::new(
            asset_account(&event.account, asset),
            Amount::new(Decimal::ZERO, asset.to_string()),
        ),
        liquidity,
    ];
    if total_withholding > Decimal::ZERO {
        postings.push(Posting::new(
            receivable_account(&event.account),
            Amount::new(total_withholding, event.currency.clone()),
        ));
    }
    postings.push(Posting::implicit(income_account(&event.account)));

    let mut meta = Meta::new();
    meta.insert("account".to_string(), event.account.clone());
    Ok(Transaction::cleared(
        event.date,
        format!("Dividend: {}", event.description),
        postings,
    )
    .with_meta(meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Price;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STATEMENT: &str = r#"<FlexQueryResponse queryName="q" type="AF">
  <FlexStatements count="1">
    <FlexStatement accountId="U1234567" fromDate="20240301" toDate="20240331">
      <Trades>
        <Trade symbol="VWRLz" currency="USD" quantity="10" tradePrice="105.20"
               tradeDate="20240305" ibCommission="-1.25" ibCommissionCurrency="USD"
               netCash="-1053.25" fxRateToBase="0.88" />
      </Trades>
      <CashTransactions>
        <CashTransaction type="Withholding Tax" symbol="VWRL" currency="USD" amount="-15.00"
                         dateTime="20240320" description="VWRL CASH DIVIDEND 1.00 PER SHARE - US TAX" />
        <CashTransaction type="Dividends" symbol="VWRL" currency="USD" amount="100.00"
                         dateTime="20240320" description="VWRL CASH DIVIDEND 1.00 PER SHARE" />
        <CashTransaction type="Other Fees" symbol="" currency="USD" amount="-2.00"
                         dateTime="20240321" description="MARKET DATA" />
      </CashTransactions>
    </FlexStatement>
  </FlexStatements>
</FlexQueryResponse>"#;

    fn send_response() -> &'static str {
        r#"<FlexStatementResponse timestamp="today">
  <Status>Success</Status>
  <ReferenceCode>REF42</ReferenceCode>
  <Url>ignored</Url>
</FlexStatementResponse>"#
    }

    fn in_progress_response() -> &'static str {
        r#"<FlexStatementResponse timestamp="today">
  <Status>Warn</Status>
  <ErrorCode>1019</ErrorCode>
  <ErrorMessage>Statement generation in progress. Please try again shortly.</ErrorMessage>
</FlexStatementResponse>"#
    }

    fn write_sidecar(dir: &Path, base_url: &str) -> std::path::PathBuf {
        let sidecar = dir.join("main.ibkr.yaml");
        let mut file = std::fs::File::create(&sidecar).unwrap();
        writeln!(
            file,
            "token: tok\nqueryId: \"42\"\nbaseCcy: CHF\nbase_url: {base_url}\nretry_secs: 0"
        )
        .unwrap();
        sidecar
    }

    fn usd_price() -> Entry {
        Entry::Price(Price {
            meta: Meta::new(),
            date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            currency: "USD".to_string(),
            amount: Amount::new(dec!(0.88), "CHF"),
        })
    }

    async fn mock_flex(server: &MockServer, in_progress_first: bool) {
        Mock::given(method("GET"))
            .and(path("/Universal/servlet/FlexStatementService.SendRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(send_response()))
            .mount(server)
            .await;
        if in_progress_first {
            Mock::given(method("GET"))
                .and(path("/Universal/servlet/FlexStatementService.GetStatement"))
                .respond_with(ResponseTemplate::new(200).set_body_string(in_progress_response()))
                .up_to_n_times(1)
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/Universal/servlet/FlexStatementService.GetStatement"))
            .respond_with(ResponseTemplate::new(200).set_body_string(STATEMENT))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn extracts_buy_and_matched_dividend() {
        let server = MockServer::start().await;
        mock_flex(&server, false).await;

        let dir = tempfile::tempdir().unwrap();
        let sidecar = write_sidecar(dir.path(), &server.uri());

        let existing = vec![usd_price()];
        let entries = IbkrImporter.extract(&sidecar, &existing).await.unwrap();
        assert_eq!(entries.len(), 2);

        let Entry::Transaction(buy) = &entries[0] else {
            panic!("expected buy transaction");
        };
        assert_eq!(buy.narration, "Buy");
        let asset_leg = &buy.postings[0];
        assert_eq!(asset_leg.account, "Assets:U1234567:Investment:IB:VWRL");
        assert_eq!(asset_leg.units.as_ref().unwrap().number, dec!(10));
        // cost converted to base: 105.20 * 0.88
        let cost = asset_leg.cost.as_ref().unwrap();
        assert_eq!(cost.number, dec!(92.5760));
        assert_eq!(cost.currency, "CHF");
        let fee_leg = &buy.postings[1];
        assert_eq!(fee_leg.units.as_ref().unwrap().number, dec!(1.10));
        let liquidity_leg = &buy.postings[2];
        assert_eq!(liquidity_leg.units.as_ref().unwrap().number, dec!(-1053.25));
        assert_eq!(liquidity_leg.price.as_ref().unwrap().number, dec!(0.88));

        let Entry::Transaction(dividend) = &entries[1] else {
            panic!("expected dividend transaction");
        };
        assert_eq!(dividend.narration, "Dividend: VWRL CASH DIVIDEND 1.00 PER SHARE");
        // payout = 100 - 15 on the liquidity account, 15 receivable
        assert_eq!(dividend.postings[1].units.as_ref().unwrap().number, dec!(85.00));
        assert_eq!(
            dividend.postings[2].account,
            "Assets:U1234567:Receivable:Verrechnungssteuer"
        );
        assert_eq!(dividend.postings[2].units.as_ref().unwrap().number, dec!(15.00));
        assert!(dividend.postings[3].units.is_none());
        assert_eq!(
            dividend.postings[1].price.as_ref().unwrap().number,
            dec!(0.88)
        );
    }

    #[tokio::test]
    async fn retries_once_while_statement_is_generated() {
        let server = MockServer::start().await;
        mock_flex(&server, true).await;

        let dir = tempfile::tempdir().unwrap();
        let sidecar = write_sidecar(dir.path(), &server.uri());

        let entries = IbkrImporter
            .extract(&sidecar, &[usd_price()])
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn per_share_extraction() {
        assert_eq!(per_share("VWRL CASH DIVIDEND 1.00 PER SHARE - US TAX"), Some("1.00"));
        assert_eq!(per_share("VWRL CASH DIVIDEND 1.00 PER SHARE"), Some("1.00"));
        assert_eq!(per_share("no per share info"), None);
    }
}
