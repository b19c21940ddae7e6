//! Slack incoming-webhook sink.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use super::NotificationSink;

pub struct SlackSink {
    http: Client,
    /// Incoming-webhook URLs embed an access token, so the whole URL is
    /// treated as a secret.
    webhook_url: SecretString,
}

impl SlackSink {
    pub fn new(webhook_url: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build Slack HTTP client")?;
        Ok(Self { http, webhook_url })
    }
}

#[async_trait]
impl NotificationSink for SlackSink {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, text: &str) -> Result<()> {
        let payload = json!({
            "username": "satminer",
            "icon_emoji": ":robot_face:",
            "text": text,
        });

        let response = self
            .http
            .post(self.webhook_url.expose_secret())
            .json(&payload)
            .send()
            .await
            .context("Slack webhook request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Slack webhook returned status {status}: {body}");
        }
        Ok(())
    }
}
