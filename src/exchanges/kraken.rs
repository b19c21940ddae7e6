//! Kraken REST client.
//!
//! Private endpoints sign `path + SHA256(nonce + body)` with
//! HMAC-SHA512 keyed by the base64-decoded API secret. Withdrawals go
//! to a key name registered on the account, and Kraken deducts the
//! network fee server-side, so no fee estimate is applied locally.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256, Sha512};

use super::ExchangeClient;
use crate::types::WithdrawalReceipt;

const DEFAULT_BASE_URL: &str = "https://api.kraken.com";

#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct WithdrawResult {
    refid: String,
}

pub struct KrakenClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    api_secret: SecretString,
    withdrawal_wallet: String,
    currency: String,
}

impl KrakenClient {
    pub fn new(
        api_key: SecretString,
        api_secret: SecretString,
        withdrawal_wallet: String,
        currency: String,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Kraken HTTP client")?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            api_secret,
            withdrawal_wallet,
            currency,
        })
    }

    fn sign(&self, path: &str, nonce: &str, body: &str) -> Result<String> {
        let secret = BASE64
            .decode(self.api_secret.expose_secret())
            .context("Kraken API secret is not valid base64")?;

        let mut hasher = Sha256::new();
        hasher.update(nonce.as_bytes());
        hasher.update(body.as_bytes());
        let digest = hasher.finalize();

        let mut mac = Hmac::<Sha512>::new_from_slice(&secret)
            .map_err(|_| anyhow!("Kraken API secret has invalid length"))?;
        mac.update(path.as_bytes());
        mac.update(&digest);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn post_private<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        mut payload: serde_json::Value,
    ) -> Result<T> {
        let nonce = chrono::Utc::now().timestamp_millis().to_string();
        payload["nonce"] = json!(nonce);
        // The signature covers the exact bytes sent, so serialize once.
        let body = serde_json::to_string(&payload)?;
        let signature = self.sign(path, &nonce, &body)?;

        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("API-Key", self.api_key.expose_secret())
            .header("API-Sign", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("Kraken request to {path} failed"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Kraken returned status {status} for {path}: {text}");
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Kraken response from {path}"))
    }
}

#[async_trait]
impl ExchangeClient for KrakenClient {
    async fn get_account_balance(&self) -> Result<Decimal> {
        let response: KrakenResponse<HashMap<String, Decimal>> =
            self.post_private("/0/private/Balance", json!({})).await?;
        if !response.error.is_empty() {
            bail!("Kraken balance query failed: {}", response.error.join("; "));
        }
        let balances = response
            .result
            .ok_or_else(|| anyhow!("Kraken balance response carried no result"))?;
        // Kraken prefixes crypto assets with X, e.g. XBT lives under XXBT.
        let key = format!("X{}", self.currency);
        Ok(balances
            .get(&key)
            .or_else(|| balances.get(&self.currency))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn withdraw_funds(&self, amount: Decimal) -> Result<WithdrawalReceipt> {
        let payload = json!({
            "asset": self.currency,
            "key": self.withdrawal_wallet,
            "amount": amount.to_string(),
        });
        let response: KrakenResponse<WithdrawResult> =
            self.post_private("/0/private/Withdraw", payload).await?;

        if !response.error.is_empty() {
            return Ok(WithdrawalReceipt {
                reference: None,
                error: Some(response.error.join("; ")),
            });
        }
        Ok(WithdrawalReceipt {
            reference: response.result.map(|r| r.refid),
            error: None,
        })
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    fn withdrawal_wallet(&self) -> &str {
        &self.withdrawal_wallet
    }

    fn name(&self) -> &str {
        "kraken"
    }
}
