//! Rare-sat extraction service client.
//!
//! The extraction service scans the collection address, identifies rare
//! satoshi ranges in its UTXOs and proposes an unsigned transaction that
//! routes rare sats to inventory and common sats to the exchange deposit
//! address. The proposal is untrusted: everything it says is re-checked
//! by the custody validator before signing.

use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::types::{ExtractionProposal, ExtractionRequest};

/// Abstraction over the extraction service, mockable in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Request an extraction proposal for the configured scan address.
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionProposal>;
}

pub struct OrdinalsBotClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl OrdinalsBotClient {
    pub fn new(base_url: &str, api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to build extraction HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ExtractionClient for OrdinalsBotClient {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionProposal> {
        let url = format!("{}/extract", self.base_url);
        debug!(
            scan_address = %request.scan_address,
            fee_per_byte = request.fee_per_byte,
            filtered = request.filter_satributes.is_some(),
            "Requesting extraction proposal"
        );

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .context("Extraction service request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Extraction service error {status}: {body}");
        }

        let proposal: ExtractionProposal = resp
            .json()
            .await
            .context("Failed to parse extraction proposal")?;

        debug!(
            ranges = proposal.special_ranges.len(),
            has_tx = proposal.tx.is_some(),
            "Extraction proposal received"
        );
        Ok(proposal)
    }
}
