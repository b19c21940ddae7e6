//! Coinbase REST client.
//!
//! Requests sign `timestamp + method + path + body` with HMAC-SHA256,
//! hex-encoded, where the timestamp is unix seconds. The BTC account id
//! is looked up once and cached for the life of the client. Coinbase
//! exposes no fee-quote endpoint, so withdrawals use a flat estimate.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::sync::OnceCell;

use super::ExchangeClient;
use crate::types::WithdrawalReceipt;

const DEFAULT_BASE_URL: &str = "https://api.coinbase.com";
const API_VERSION: &str = "2024-03-22";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
    balance: AccountBalance,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    id: String,
}

pub struct CoinbaseClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    api_secret: SecretString,
    withdrawal_wallet: String,
    currency: String,
    account_id: OnceCell<String>,
}

impl CoinbaseClient {
    pub fn new(
        api_key: SecretString,
        api_secret: SecretString,
        withdrawal_wallet: String,
        currency: String,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Coinbase HTTP client")?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            api_secret,
            withdrawal_wallet,
            currency,
            account_id: OnceCell::new(),
        })
    }

    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.expose_secret().as_bytes())
            .map_err(|_| anyhow!("Coinbase API secret has invalid length"))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Envelope<T>> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let body_text = match &body {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };
        let signature = self.sign(&timestamp, method.as_str(), path, &body_text)?;

        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .header("CB-ACCESS-KEY", self.api_key.expose_secret())
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header("CB-VERSION", API_VERSION)
            .header("Content-Type", "application/json");
        if !body_text.is_empty() {
            builder = builder.body(body_text);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Coinbase request to {path} failed"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Coinbase returned status {status} for {path}: {text}");
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Coinbase response from {path}"))
    }

    async fn account_id(&self) -> Result<&str> {
        let id = self
            .account_id
            .get_or_try_init(|| async {
                let path = format!("/v2/accounts/{}", self.currency);
                let envelope: Envelope<Account> =
                    self.request(reqwest::Method::GET, &path, None).await?;
                envelope
                    .data
                    .map(|a| a.id)
                    .ok_or_else(|| anyhow!("Coinbase account lookup returned no data"))
            })
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl ExchangeClient for CoinbaseClient {
    async fn get_account_balance(&self) -> Result<Decimal> {
        let account_id = self.account_id().await?.to_string();
        let path = format!("/v2/accounts/{account_id}");
        let envelope: Envelope<Account> = self.request(reqwest::Method::GET, &path, None).await?;
        envelope
            .data
            .map(|a| a.balance.amount)
            .ok_or_else(|| anyhow!("Coinbase balance query returned no data"))
    }

    fn flat_fee_estimate(&self) -> Decimal {
        dec!(0.001)
    }

    async fn withdraw_funds(&self, amount: Decimal) -> Result<WithdrawalReceipt> {
        let account_id = self.account_id().await?.to_string();
        let path = format!("/v2/accounts/{account_id}/transactions");
        let payload = json!({
            "type": "send",
            "amount": amount.to_string(),
            "currency": self.currency,
            "to": self.withdrawal_wallet,
            "to_financial_institution": false,
        });
        let envelope: Envelope<TransactionData> = self
            .request(reqwest::Method::POST, &path, Some(payload))
            .await?;

        match envelope.data {
            Some(tx) => Ok(WithdrawalReceipt {
                reference: Some(tx.id),
                error: None,
            }),
            None => Ok(WithdrawalReceipt {
                reference: None,
                error: Some("response carried no transaction id".to_string()),
            }),
        }
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    fn withdrawal_wallet(&self) -> &str {
        &self.withdrawal_wallet
    }

    fn name(&self) -> &str {
        "coinbase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CoinbaseClient {
        CoinbaseClient::new(
            SecretString::new("key".to_string()),
            SecretString::new("secret".to_string()),
            "bc1qwithdraw".to_string(),
            "BTC".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_signature_is_hex_encoded() {
        let c = client();
        let sig = c.sign("1711100000", "GET", "/v2/accounts/BTC", "").unwrap();
        // HMAC-SHA256 digest is 32 bytes, 64 hex chars.
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_depends_on_body() {
        let c = client();
        let empty = c.sign("1711100000", "POST", "/v2/accounts/x/transactions", "").unwrap();
        let with_body = c
            .sign(
                "1711100000",
                "POST",
                "/v2/accounts/x/transactions",
                r#"{"type":"send"}"#,
            )
            .unwrap();
        assert_ne!(empty, with_body);
    }

    #[test]
    fn test_account_response_parsing() {
        let raw = r#"{"data":{"id":"acc-123","balance":{"amount":"0.45","currency":"BTC"}}}"#;
        let parsed: Envelope<Account> = serde_json::from_str(raw).unwrap();
        let account = parsed.data.unwrap();
        assert_eq!(account.id, "acc-123");
        assert_eq!(account.balance.amount, Decimal::from_str_exact("0.45").unwrap());
    }

    #[test]
    fn test_flat_fee_estimate() {
        assert_eq!(client().flat_fee_estimate(), dec!(0.001));
    }
}
