//! GoCardless Bank Account Data (formerly Nordigen) API.
//!
//! The sidecar `*.nordigen.yaml` carries the API credentials and the
//! account-id to ledger-account mapping. Extraction is two sequential
//! calls: obtain an access token, then page through booked transactions
//! per configured account.

use crate::config::load_sidecar;
use crate::dedup::ReferenceDuplicates;
use crate::error::{ImportError, Result};
use crate::importer::{Importer, file_name};
use crate::model::{Amount, Entry, Meta, Posting, Transaction};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, instrument};

const DEFAULT_BASE_URL: &str = "https://bankaccountdata.gocardless.com";

#[derive(Debug, Deserialize)]
pub struct NordigenConfig {
    pub secret_id: String,
    pub secret_key: String,
    pub accounts: Vec<NordigenAccount>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct NordigenAccount {
    pub id: String,
    pub asset_account: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: String,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    transactions: BookedTransactions,
}

#[derive(Debug, Deserialize)]
struct BookedTransactions {
    booked: Vec<BookedTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookedTransaction {
    transaction_id: Option<String>,
    booking_date: NaiveDate,
    transaction_amount: TransactionAmount,
    creditor_name: Option<String>,
    debtor_name: Option<String>,
    currency_exchange: Option<CurrencyExchange>,
    remittance_information_unstructured: Option<String>,
    #[serde(default)]
    remittance_information_unstructured_array: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionAmount {
    amount: Decimal,
    currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyExchange {
    instructed_amount: InstructedAmount,
}

#[derive(Debug, Deserialize)]
struct InstructedAmount {
    amount: String,
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

pub struct NordigenImporter;

#[async_trait]
impl Importer for NordigenImporter {
    fn name(&self) -> &str {
        "nordigen"
    }

    fn identify(&self, path: &Path) -> bool {
        file_name(path).ends_with("nordigen.yaml")
    }

    #[instrument(name = "NordigenExtract", skip(self, _existing))]
    async fn extract(&self, path: &Path, _existing: &[Entry]) -> Result<Vec<Entry>> {
        let config: NordigenConfig = load_sidecar(path)?;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/api/v2/token/new/", config.base_url))
            .form(&[
                ("secret_id", config.secret_id.as_str()),
                ("secret_key", config.secret_key.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = error_for_status(response).await?.json().await?;

        let mut entries = Vec::new();
        for account in &config.accounts {
            let url = format!(
                "{}/api/v2/accounts/{}/transactions/",
                config.base_url, account.id
            );
            debug!("Requesting transactions from {}", url);
            let response = client
                .get(&url)
                .bearer_auth(&token.access)
                .send()
                .await?;
            let payload: TransactionsResponse =
                error_for_status(response).await?.json().await?;

            let mut booked = payload.transactions.booked;
            booked.sort_by_key(|trx| trx.booking_date);

            for trx in &booked {
                entries.push(Entry::Transaction(booked_to_transaction(
                    trx,
                    &account.asset_account,
                )));
            }
        }

        Ok(entries)
    }

    fn comparator(&self) -> ReferenceDuplicates {
        ReferenceDuplicates::new(["nordref"])
    }
}

fn booked_to_transaction(trx: &BookedTransaction, asset_account: &str) -> Transaction {
    let mut meta = Meta::new();
    if let Some(id) = &trx.transaction_id {
        meta.insert("nordref".to_string(), id.clone());
    }
    if let Some(name) = &trx.creditor_name {
        meta.insert("creditorName".to_string(), name.clone());
    }
    if let Some(name) = &trx.debtor_name {
        meta.insert("debtorName".to_string(), name.clone());
    }
    if let Some(exchange) = &trx.currency_exchange {
        meta.insert(
            "original".to_string(),
            format!(
                "{} {}",
                exchange.instructed_amount.currency, exchange.instructed_amount.amount
            ),
        );
    }

    let mut narration = String::new();
    if let Some(info) = &trx.remittance_information_unstructured {
        narration.push_str(info);
    }
    if !trx.remittance_information_unstructured_array.is_empty() {
        narration.push_str(&trx.remittance_information_unstructured_array.join(" "));
    }

    Transaction::cleared(
        trx.booking_date,
        narration,
        vec![Posting::new(
            asset_account,
            Amount::new(
                trx.transaction_amount.amount,
                trx.transaction_amount.currency.clone(),
            ),
        )],
    )
    .with_meta(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn write_sidecar(dir: &Path, base_url: &str) -> std::path::PathBuf {
        let sidecar = dir.join("main.nordigen.yaml");
        let mut file = std::fs::File::create(&sidecar).unwrap();
        writeln!(
            file,
            "secret_id: sid\nsecret_key: skey\nbase_url: {base_url}\naccounts:\n  - id: acc-1\n    asset_account: Assets:Revolut:CHF"
        )
        .unwrap();
        sidecar
    }

    #[tokio::test]
    async fn extracts_booked_transactions_sorted_by_date() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/token/new/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"access": "tok"}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/accounts/acc-1/transactions/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"transactions": {"booked": [
                    {"transactionId": "T2", "bookingDate": "2024-02-02",
                     "transactionAmount": {"amount": "-12.50", "currency": "CHF"},
                     "remittanceInformationUnstructured": "Lunch"},
                    {"transactionId": "T1", "bookingDate": "2024-02-01",
                     "transactionAmount": {"amount": "100.00", "currency": "CHF"},
                     "creditorName": "ACME AG",
                     "currencyExchange": {"instructedAmount": {"amount": "105.00", "currency": "EUR"}},
                     "remittanceInformationUnstructuredArray": ["Refund", "Order 7"]}
                ]}}"#,
            ))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let sidecar = write_sidecar(dir.path(), &server.uri());

        let importer = NordigenImporter;
        assert!(importer.identify(&sidecar));

        let entries = importer.extract(&sidecar, &[]).await.unwrap();
        assert_eq!(entries.len(), 2);

        let Entry::Transaction(first) = &entries[0] else {
            panic!("expected transaction");
        };
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(first.narration, "Refund Order 7");
        assert_eq!(first.meta.get("nordref").map(String::as_str), Some("T1"));
        assert_eq!(
            first.meta.get("original").map(String::as_str),
            Some("EUR 105.00")
        );
        assert_eq!(
            first.postings[0].units.as_ref().unwrap().number,
            dec!(100.00)
        );
    }

    #[tokio::test]
    async fn http_failures_surface_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/token/new/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let sidecar = write_sidecar(dir.path(), &server.uri());

        let err = NordigenImporter.extract(&sidecar, &[]).await.unwrap_err();
        match err {
            ImportError::HttpService { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad credentials");
            }
            other => panic!("expected HttpService, got {other}"),
        }
    }

    #[test]
    fn dedup_uses_nordref() {
        let keys = NordigenImporter.comparator();
        let mut meta = Meta::new();
        meta.insert("nordref".to_string(), "T1".to_string());
        let entry = Entry::Transaction(
            Transaction::cleared(
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                "x",
                vec![Posting::new("Assets:A", Amount::new(dec!(1), "CHF"))],
            )
            .with_meta(meta),
        );
        assert_eq!(keys.compare(&entry, &entry.clone()).len(), 1);
    }
}
