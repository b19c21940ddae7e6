//! Bitcoin Core wallet RPC.
//!
//! Thin JSON-RPC 1.0 client over HTTP basic auth. The trait seam exists
//! so the rotation engine can be exercised against a mock node.

use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::types::{DecodedTransaction, SignRawTransactionResult};

/// The subset of Bitcoin Core wallet RPC the agent consumes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WalletRpc: Send + Sync {
    async fn get_raw_transaction(&self, txid: &str) -> Result<String>;

    async fn decode_raw_transaction(&self, raw_hex: &str) -> Result<DecodedTransaction>;

    async fn sign_raw_transaction_with_wallet(
        &self,
        raw_hex: &str,
    ) -> Result<SignRawTransactionResult>;

    /// Broadcast a signed transaction, returning its txid.
    async fn send_raw_transaction(&self, signed_hex: &str) -> Result<String>;

    /// Wallet balance in BTC at the given confirmation depth.
    async fn get_balance(&self, min_conf: u32) -> Result<f64>;

    async fn get_unconfirmed_balance(&self) -> Result<f64>;

    async fn list_wallets(&self) -> Result<Vec<String>>;

    async fn load_wallet(&self, name: &str) -> Result<()>;
}

pub struct CoreRpcClient {
    http: Client,
    url: String,
    username: String,
    password: SecretString,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl CoreRpcClient {
    pub fn new(
        host: &str,
        port: u16,
        wallet: &str,
        username: String,
        password: SecretString,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build bitcoin RPC client")?;

        Ok(Self {
            http,
            url: format!("http://{host}:{port}/wallet/{wallet}"),
            username,
            password,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        debug!(method = method, "Calling bitcoin RPC");

        let body = json!({
            "jsonrpc": "1.0",
            "id": "satminer",
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("bitcoin RPC {method} request failed"))?;

        let status = resp.status();
        let envelope: RpcEnvelope<T> = resp
            .json()
            .await
            .with_context(|| format!("bitcoin RPC {method} returned non-JSON ({status})"))?;

        if let Some(err) = envelope.error {
            anyhow::bail!("bitcoin RPC {method} error {}: {}", err.code, err.message);
        }
        envelope
            .result
            .with_context(|| format!("bitcoin RPC {method} returned no result"))
    }
}

#[async_trait]
impl WalletRpc for CoreRpcClient {
    async fn get_raw_transaction(&self, txid: &str) -> Result<String> {
        self.call("getrawtransaction", json!([txid])).await
    }

    async fn decode_raw_transaction(&self, raw_hex: &str) -> Result<DecodedTransaction> {
        self.call("decoderawtransaction", json!([raw_hex])).await
    }

    async fn sign_raw_transaction_with_wallet(
        &self,
        raw_hex: &str,
    ) -> Result<SignRawTransactionResult> {
        self.call("signrawtransactionwithwallet", json!([raw_hex]))
            .await
    }

    async fn send_raw_transaction(&self, signed_hex: &str) -> Result<String> {
        self.call("sendrawtransaction", json!([signed_hex])).await
    }

    async fn get_balance(&self, min_conf: u32) -> Result<f64> {
        self.call("getbalance", json!(["*", min_conf])).await
    }

    async fn get_unconfirmed_balance(&self) -> Result<f64> {
        self.call("getunconfirmedbalance", json!([])).await
    }

    async fn list_wallets(&self) -> Result<Vec<String>> {
        self.call("listwallets", json!([])).await
    }

    async fn load_wallet(&self, name: &str) -> Result<()> {
        let _: serde_json::Value = self.call("loadwallet", json!([name])).await?;
        Ok(())
    }
}
