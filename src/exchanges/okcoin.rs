//! OKCoin (OKX) REST client.
//!
//! Requests sign `timestamp + method + path + body` with HMAC-SHA256
//! over the raw API secret, base64-encoded, carried in the
//! `OK-ACCESS-*` headers together with the account passphrase. The
//! timestamp is RFC 3339 with millisecond precision.
//!
//! Withdrawals require the on-chain fee in the request body, so the
//! client re-quotes the fee at submission time.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::SecondsFormat;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use super::ExchangeClient;
use crate::types::WithdrawalReceipt;

const DEFAULT_BASE_URL: &str = "https://www.okcoin.com";
const BTC_CHAIN: &str = "BTC-Bitcoin";
/// `dest` value for an on-chain withdrawal (as opposed to internal transfer).
const DEST_ON_CHAIN: &str = "4";

#[derive(Debug, Deserialize)]
struct OkcoinResponse<T> {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    ccy: String,
    #[serde(rename = "availBal")]
    avail_bal: Decimal,
}

#[derive(Debug, Deserialize)]
struct CurrencyInfo {
    chain: String,
    #[serde(rename = "maxFee")]
    max_fee: Decimal,
}

#[derive(Debug, Deserialize)]
struct WithdrawalData {
    #[serde(rename = "wdId")]
    wd_id: String,
}

pub struct OkcoinClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    api_secret: SecretString,
    passphrase: SecretString,
    withdrawal_wallet: String,
    currency: String,
}

impl OkcoinClient {
    pub fn new(
        api_key: SecretString,
        api_secret: SecretString,
        passphrase: SecretString,
        withdrawal_wallet: String,
        currency: String,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build OKCoin HTTP client")?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            api_secret,
            passphrase,
            withdrawal_wallet,
            currency,
        })
    }

    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.expose_secret().as_bytes())
            .map_err(|_| anyhow!("OKCoin API secret has invalid length"))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    fn timestamp() -> String {
        chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<OkcoinResponse<T>> {
        let timestamp = Self::timestamp();
        let body_text = match &body {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };
        let signature = self.sign(&timestamp, method.as_str(), path, &body_text)?;

        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .header("OK-ACCESS-KEY", self.api_key.expose_secret())
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", self.passphrase.expose_secret());
        if !body_text.is_empty() {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body_text);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("OKCoin request to {path} failed"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("OKCoin returned status {status} for {path}: {text}");
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse OKCoin response from {path}"))
    }

    async fn quote_chain_fee(&self) -> Result<Decimal> {
        let path = format!("/api/v5/asset/currencies?ccy={}", self.currency);
        let response: OkcoinResponse<CurrencyInfo> =
            self.request(reqwest::Method::GET, &path, None).await?;
        if !response.msg.is_empty() {
            bail!(
                "OKCoin fee query failed (code {}): {}",
                response.code,
                response.msg
            );
        }
        response
            .data
            .into_iter()
            .find(|c| c.chain == BTC_CHAIN)
            .map(|c| c.max_fee)
            .ok_or_else(|| anyhow!("OKCoin fee query returned no {BTC_CHAIN} chain"))
    }
}

#[async_trait]
impl ExchangeClient for OkcoinClient {
    async fn get_account_balance(&self) -> Result<Decimal> {
        let response: OkcoinResponse<AssetBalance> = self
            .request(reqwest::Method::GET, "/api/v5/asset/balances", None)
            .await?;
        if !response.msg.is_empty() {
            bail!(
                "OKCoin balance query failed (code {}): {}",
                response.code,
                response.msg
            );
        }
        Ok(response
            .data
            .into_iter()
            .find(|b| b.ccy == self.currency)
            .map(|b| b.avail_bal)
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_withdrawal_fee(&self) -> Result<Option<Decimal>> {
        Ok(Some(self.quote_chain_fee().await?))
    }

    async fn withdraw_funds(&self, amount: Decimal) -> Result<WithdrawalReceipt> {
        // The request body must carry the fee, so quote it again here;
        // the lane already subtracted the same quote from the amount.
        let fee = self.quote_chain_fee().await?;
        let payload = json!({
            "ccy": self.currency,
            "amt": amount.to_string(),
            "dest": DEST_ON_CHAIN,
            "toAddr": self.withdrawal_wallet,
            "fee": fee.to_string(),
            "chain": BTC_CHAIN,
        });
        let response: OkcoinResponse<WithdrawalData> = self
            .request(reqwest::Method::POST, "/api/v5/asset/withdrawal", Some(payload))
            .await?;

        if !response.msg.is_empty() {
            return Ok(WithdrawalReceipt {
                reference: None,
                error: Some(format!("code {}: {}", response.code, response.msg)),
            });
        }
        Ok(WithdrawalReceipt {
            reference: response.data.into_iter().next().map(|w| w.wd_id),
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
        "okcoin"
    }
}
