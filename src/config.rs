//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, RPC credentials, webhook URLs) are referenced by
//! env-var name in the config and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::str::FromStr;

use crate::types::{NotificationLevel, RareSatWallet, DUST_LIMIT};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub rotation: RotationConfig,
    pub withdrawal: WithdrawalConfig,
    pub exchange: ExchangeConfig,
    pub bitcoin_rpc: BitcoinRpcConfig,
    pub extraction: ExtractionConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RotationConfig {
    /// Public collection address scanned for incoming rare sats.
    pub tumbler_address: String,
    /// Default destination for rare sats when no custom wallet matches.
    pub inventory_address: String,
    /// Minimum BTC a sweep must deposit at the exchange.
    pub min_deposit_btc: f64,
    /// Circuit breaker: abort the cycle above this fee rate (sat/vB).
    #[serde(default = "default_max_fee_rate")]
    pub max_fee_rate: u64,
    /// Smallest output the extraction service should produce, in sats.
    #[serde(default = "default_min_output_size")]
    pub min_output_size: u64,
    pub extract_interval_min: u64,
    /// When set, only these satributes are extracted.
    #[serde(default)]
    pub include_satributes: Option<Vec<String>>,
    /// Custom rare-sat wallets, ranked by priority top to bottom.
    #[serde(default)]
    pub rare_sat_wallets: Vec<RareSatWallet>,
}

fn default_max_fee_rate() -> u64 {
    1000
}

fn default_min_output_size() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct WithdrawalConfig {
    pub min_btc: Decimal,
    pub max_btc: Decimal,
    pub interval_min: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    /// Which exchange lane is active: "kraken" | "okcoin" | "coinbase".
    pub active: String,
    pub kraken: Option<KrakenConfig>,
    pub okcoin: Option<OkcoinConfig>,
    pub coinbase: Option<CoinbaseConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KrakenConfig {
    pub api_key_env: String,
    pub api_secret_env: String,
    /// Withdrawal key name registered on the Kraken account.
    pub withdrawal_wallet: String,
    /// Exchange deposit address the sweep sends common sats to.
    pub deposit_address: String,
    #[serde(default = "default_kraken_currency")]
    pub currency: String,
}

fn default_kraken_currency() -> String {
    "XBT".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OkcoinConfig {
    pub api_key_env: String,
    pub api_secret_env: String,
    pub passphrase_env: String,
    pub withdrawal_wallet: String,
    pub deposit_address: String,
    #[serde(default = "default_btc_currency")]
    pub currency: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoinbaseConfig {
    pub api_key_env: String,
    pub api_secret_env: String,
    pub withdrawal_wallet: String,
    pub deposit_address: String,
    #[serde(default = "default_btc_currency")]
    pub currency: String,
}

fn default_btc_currency() -> String {
    "BTC".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BitcoinRpcConfig {
    pub host: String,
    pub port: u16,
    pub wallet: String,
    pub username_env: String,
    pub password_env: String,
    #[serde(default = "default_network")]
    pub network: String,
}

fn default_network() -> String {
    "bitcoin".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_url")]
    pub base_url: String,
    pub api_key_env: String,
}

fn default_extraction_url() -> String {
    "https://api.ordinalsbot.com/satextractor".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub level: NotificationLevel,
    pub slack_webhook_env: Option<String>,
    pub telegram_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file and validate invariants that
    /// would otherwise surface as fund-handling bugs at runtime.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.withdrawal.min_btc > self.withdrawal.max_btc {
            bail!(
                "withdrawal.min_btc ({}) is greater than withdrawal.max_btc ({})",
                self.withdrawal.min_btc,
                self.withdrawal.max_btc
            );
        }
        if self.rotation.min_output_size <= DUST_LIMIT {
            bail!(
                "rotation.min_output_size must be greater than the dust limit ({DUST_LIMIT} sats)"
            );
        }
        if self.rotation.tumbler_address.is_empty() {
            bail!("rotation.tumbler_address is required");
        }
        if self.rotation.inventory_address.is_empty() {
            bail!("rotation.inventory_address is required");
        }
        // The active exchange must have its section present.
        self.deposit_address()?;
        Ok(())
    }

    /// Exchange deposit address for the active lane — the address common
    /// sats are swept to.
    pub fn deposit_address(&self) -> Result<&str> {
        match self.exchange.active.as_str() {
            "kraken" => self
                .exchange
                .kraken
                .as_ref()
                .map(|k| k.deposit_address.as_str())
                .context("exchange.active is kraken but [exchange.kraken] is missing"),
            "okcoin" => self
                .exchange
                .okcoin
                .as_ref()
                .map(|o| o.deposit_address.as_str())
                .context("exchange.active is okcoin but [exchange.okcoin] is missing"),
            "coinbase" => self
                .exchange
                .coinbase
                .as_ref()
                .map(|c| c.deposit_address.as_str())
                .context("exchange.active is coinbase but [exchange.coinbase] is missing"),
            other => bail!("unknown exchange: {other}"),
        }
    }

    /// Bitcoin network the wallet operates on.
    pub fn network(&self) -> Result<bitcoin::Network> {
        bitcoin::Network::from_str(&self.bitcoin_rpc.network)
            .with_context(|| format!("invalid bitcoin_rpc.network: {}", self.bitcoin_rpc.network))
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
