//! TrueLayer data API (used for Revolut and other open-banking sources).
//!
//! The refresh token in the sidecar is exchanged for an access token,
//! then every account's transactions are pulled. The newest transaction
//! also yields a balance assertion when the API reports a running
//! balance; if the host ledger already has an assertion for that day the
//! entry is marked `__duplicate__` so the reconciliation pass drops it.

use crate::config::load_sidecar;
use crate::dedup::ReferenceDuplicates;
use crate::error::{ImportError, Result};
use crate::importer::{Importer, file_name};
use crate::model::{Amount, BalanceAssertion, Entry, Meta, Posting, Transaction};
use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
pub struct TruelayerConfig {
    #[serde(rename = "baseAccount")]
    pub base_account: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Overrides both auth and data endpoints; for tests.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl TruelayerConfig {
    fn auth_url(&self) -> String {
        match &self.base_url {
            Some(url) => format!("{url}/connect/token"),
            None if self.client_id.starts_with("sandbox") => {
                "https://auth.truelayer-sandbox.com/connect/token".to_string()
            }
            None => "https://auth.truelayer.com/connect/token".to_string(),
        }
    }

    fn data_url(&self) -> String {
        match &self.base_url {
            Some(url) => format!("{url}/data/v1"),
            None if self.client_id.starts_with("sandbox") => {
                "https://api.truelayer-sandbox.com/data/v1".to_string()
            }
            None => "https://api.truelayer.com/data/v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TlAccount {
    account_id: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct TlTransaction {
    timestamp: DateTime<Utc>,
    description: String,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: String,
    #[serde(default)]
    transaction_classification: Vec<String>,
    #[serde(default)]
    meta: Option<TlTransactionMeta>,
    #[serde(default)]
    running_balance: Option<RunningBalance>,
}

#[derive(Debug, Deserialize)]
struct TlTransactionMeta {
    provider_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunningBalance {
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: String,
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ImportError::HttpService {
        status: status.as_u16(),
        body,
    })
}

pub struct TruelayerImporter;

#[async_trait]
impl Importer for TruelayerImporter {
    fn name(&self) -> &str {
        "truelayer"
    }

    fn identify(&self, path: &Path) -> bool {
        file_name(path).ends_with("truelayer.yaml")
    }

    #[instrument(name = "TruelayerExtract", skip(self, existing))]
    async fn extract(&self, path: &Path, existing: &[Entry]) -> Result<Vec<Entry>> {
        let config: TruelayerConfig = load_sidecar(path)?;
        let client = reqwest::Client::new();

        let response = client
            .post(config.auth_url())
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("refresh_token", config.refresh_token.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = error_for_status(response).await?.json().await?;

        let accounts_url = format!("{}/accounts", config.data_url());
        debug!("Requesting accounts from {}", accounts_url);
        let response = client
            .get(&accounts_url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        let accounts: ResultsResponse<TlAccount> =
            error_for_status(response).await?.json().await?;

        let mut entries = Vec::new();
        for account in &accounts.results {
            let url = format!("{}/accounts/{}/transactions", config.data_url(), account.account_id);
            let response = client
                .get(&url)
                .bearer_auth(&token.access_token)
                .send()
                .await?;
            let transactions: ResultsResponse<TlTransaction> =
                error_for_status(response).await?.json().await?;

            let mut sorted = transactions.results;
            sorted.sort_by_key(|trx| trx.timestamp);

            let local_account = format!("{}{}", config.base_account, account.currency);
            for (index, trx) in sorted.iter().enumerate() {
                let is_newest = index + 1 == sorted.len();
                entries.extend(extract_transaction(trx, &local_account, is_newest, existing));
            }
        }

        Ok(entries)
    }

    fn comparator(&self) -> ReferenceDuplicates {
        ReferenceDuplicates::new(["tlref"])
    }
}

fn extract_transaction(
    trx: &TlTransaction,
    local_account: &str,
    is_newest: bool,
    existing: &[Entry],
) -> Vec<Entry> {
    let mut entries = Vec::new();

    let mut meta = Meta::new();
    // the sandbox mock bank has no provider id
    if let Some(provider_id) = trx.meta.as_ref().and_then(|m| m.provider_id.as_ref()) {
        meta.insert("tlref".to_string(), provider_id.clone());
    }
    if let Some(category) = trx.transaction_classification.first() {
        meta.insert("category".to_string(), category.clone());
    }

    let trx_date = trx.timestamp.date_naive();
    entries.push(Entry::Transaction(
        Transaction::cleared(
            trx_date,
            trx.description.clone(),
            vec![Posting::new(
                local_account,
                Amount::new(trx.amount, trx.currency.clone()),
            )],
        )
        .with_meta(meta),
    ));

    // balance permission may be absent, running_balance only then
    if is_newest {
        if let Some(balance) = &trx.running_balance {
            let balance_date = trx_date + Days::new(1);
            let mut meta = Meta::new();
            let already_asserted = existing.iter().any(|entry| {
                matches!(entry, Entry::Balance(b)
                    if b.date == balance_date && b.account == local_account)
            });
            if already_asserted {
                meta.insert("__duplicate__".to_string(), "true".to_string());
            }
            entries.push(Entry::Balance(BalanceAssertion {
                meta,
                date: balance_date,
                account: local_account.to_string(),
                amount: Amount::new(balance.amount, balance.currency.clone()),
            }));
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_api() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"access_token": "tok"}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/v1/accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"results": [{"account_id": "a1", "currency": "CHF"}]}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/v1/accounts/a1/transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"results": [
                    {"transaction_id": "t2", "timestamp": "2024-03-02T10:00:00Z",
                     "description": "Groceries", "amount": -20.5, "currency": "CHF",
                     "transaction_classification": ["Shopping"],
                     "meta": {"provider_id": "p2"},
                     "running_balance": {"amount": 979.5, "currency": "CHF"}},
                    {"transaction_id": "t1", "timestamp": "2024-03-01T09:00:00Z",
                     "description": "Top up", "amount": 1000.0, "currency": "CHF",
                     "transaction_classification": []}
                ]}"#,
            ))
            .mount(&server)
            .await;
        server
    }

    fn write_sidecar(dir: &Path, base_url: &str) -> std::path::PathBuf {
        let sidecar = dir.join("main.truelayer.yaml");
        let mut file = std::fs::File::create(&sidecar).unwrap();
        writeln!(
            file,
            "baseAccount: \"Assets:Revolut:\"\nclient_id: cid\nclient_secret: cs\nrefresh_token: rt\nbase_url: {base_url}"
        )
        .unwrap();
        sidecar
    }

    #[tokio::test]
    async fn newest_transaction_carries_running_balance() {
        let server = mock_api().await;
        let dir = tempfile::tempdir().unwrap();
        let sidecar = write_sidecar(dir.path(), &server.uri());

        let entries = TruelayerImporter.extract(&sidecar, &[]).await.unwrap();
        // oldest first, then newest, then its balance
        assert_eq!(entries.len(), 3);

        let Entry::Transaction(topup) = &entries[0] else {
            panic!("expected transaction");
        };
        assert_eq!(topup.narration, "Top up");
        assert_eq!(topup.postings[0].account, "Assets:Revolut:CHF");

        let Entry::Balance(balance) = &entries[2] else {
            panic!("expected balance");
        };
        assert_eq!(balance.date, NaiveDate::from_ymd_opt(2024, 3, 3).unwrap());
        assert_eq!(balance.amount.number, dec!(979.5));
        assert!(balance.meta.is_empty());
    }

    #[tokio::test]
    async fn known_balance_is_flagged_duplicate() {
        let server = mock_api().await;
        let dir = tempfile::tempdir().unwrap();
        let sidecar = write_sidecar(dir.path(), &server.uri());

        let existing = vec![Entry::Balance(BalanceAssertion {
            meta: Meta::new(),
            date: NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(),
            account: "Assets:Revolut:CHF".to_string(),
            amount: Amount::new(dec!(979.5), "CHF"),
        })];

        let entries = TruelayerImporter.extract(&sidecar, &existing).await.unwrap();
        let Entry::Balance(balance) = &entries[2] else {
            panic!("expected balance");
        };
        assert_eq!(
            balance.meta.get("__duplicate__").map(String::as_str),
            Some("true")
        );
    }
}
