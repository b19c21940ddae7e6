//! Wallet operations.
//!
//! Combines the pure transaction assembler with the node RPC: building
//! custom multi-output transactions, signing them with the node wallet
//! and broadcasting. Signing completeness is enforced here — a partially
//! signed transaction is never handed back for broadcast.

pub mod assembler;
pub mod rpc;

use anyhow::{Context, Result};
use bitcoin::Network;
use std::sync::Arc;
use tracing::{debug, info};

use crate::types::{DecodedTransaction, Input, Output, RotationError};
use rpc::WalletRpc;

pub struct Wallet {
    rpc: Arc<dyn WalletRpc>,
    network: Network,
}

impl Wallet {
    pub fn new(rpc: Arc<dyn WalletRpc>, network: Network) -> Self {
        Self { rpc, network }
    }

    /// Build an unsigned transaction from an input/output template,
    /// fetching each input's prior transaction so the assembler can
    /// verify the references.
    pub async fn create_unsigned_transaction(
        &self,
        inputs: &[Input],
        outputs: &[Output],
    ) -> Result<String, RotationError> {
        let mut prior = Vec::with_capacity(inputs.len());
        for input in inputs {
            let raw_hex = self.rpc.get_raw_transaction(&input.hash).await?;
            let bytes = hex::decode(&raw_hex)
                .with_context(|| format!("prior transaction {} is not hex", input.hash))?;
            prior.push(bytes);
        }

        let raw = assembler::assemble(inputs, outputs, Some(&prior), self.network)?;
        Ok(raw)
    }

    /// Sign with the node wallet. An incomplete signing result is fatal:
    /// partial signatures must never reach broadcast.
    pub async fn sign_raw_transaction(&self, raw_hex: &str) -> Result<String, RotationError> {
        let res = self.rpc.sign_raw_transaction_with_wallet(raw_hex).await?;
        if !res.complete {
            let reasons = res
                .errors
                .unwrap_or_default()
                .into_iter()
                .map(|e| e.error)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RotationError::SigningIncomplete {
                reasons: if reasons.is_empty() {
                    "no signing errors reported".to_string()
                } else {
                    reasons
                },
            });
        }
        Ok(res.hex)
    }

    pub async fn send_raw_transaction(&self, signed_hex: &str) -> Result<String> {
        self.rpc.send_raw_transaction(signed_hex).await
    }

    pub async fn decode_raw_transaction(&self, raw_hex: &str) -> Result<DecodedTransaction> {
        self.rpc.decode_raw_transaction(raw_hex).await
    }

    pub async fn get_balance(&self, min_conf: u32) -> Result<f64> {
        self.rpc.get_balance(min_conf).await
    }

    /// Confirmed plus unconfirmed balance, in BTC.
    pub async fn total_balance(&self) -> Result<f64> {
        let confirmed = self.rpc.get_balance(0).await?;
        let unconfirmed = self.rpc.get_unconfirmed_balance().await?;
        Ok(confirmed + unconfirmed)
    }

    /// Assemble, sign and broadcast in one go. Used for manual sweeps
    /// where the template is produced locally rather than proposed by
    /// the extraction service.
    pub async fn send_custom_transaction(
        &self,
        inputs: &[Input],
        outputs: &[Output],
    ) -> Result<String, RotationError> {
        let unsigned = self.create_unsigned_transaction(inputs, outputs).await?;
        let signed = self.sign_raw_transaction(&unsigned).await?;
        let txid = self.send_raw_transaction(&signed).await?;
        debug!(txid = %txid, "custom transaction broadcast");
        Ok(txid)
    }
}

/// Load the node wallet if it is not already loaded.
pub async fn ensure_wallet_loaded(rpc: &dyn WalletRpc, name: &str) -> Result<()> {
    let wallets = rpc.list_wallets().await?;
    if !wallets.iter().any(|w| w == name) {
        info!(wallet = name, "Loading bitcoin wallet");
        rpc.load_wallet(name).await?;
    }
    Ok(())
}
