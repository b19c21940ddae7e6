//! Fee oracle.
//!
//! Queries mempool.space for recommended fee rates. The orchestrator
//! consumes `fastest_fee` only, as a circuit breaker against sweeping
//! during chain congestion.

use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use tracing::debug;

use crate::types::FeeEstimate;

const MEMPOOL_API_URL: &str = "https://mempool.space/api/v1";

/// Abstraction over the fee oracle, mockable in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeeOracle: Send + Sync {
    /// Fetch the current recommended fee rates in sat/vB.
    async fn estimate_fee(&self) -> Result<FeeEstimate>;
}

pub struct MempoolClient {
    http: Client,
    base_url: String,
}

impl MempoolClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(MEMPOOL_API_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build mempool HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FeeOracle for MempoolClient {
    async fn estimate_fee(&self) -> Result<FeeEstimate> {
        let url = format!("{}/fees/recommended", self.base_url);
        debug!(url = %url, "Fetching recommended fees");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Fee oracle request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Fee oracle error {status}: {body}");
        }

        let estimate: FeeEstimate = resp
            .json()
            .await
            .context("Failed to parse fee estimation response")?;

        debug!(
            fastest = estimate.fastest_fee,
            economy = estimate.economy_fee,
            "Fee estimation fetched"
        );
        Ok(estimate)
    }
}
