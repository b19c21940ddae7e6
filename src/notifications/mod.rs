//! Operator notification fan-out.
//!
//! Messages carry a level: `Info` messages always go out, `Verbose`
//! messages only when the configured level is verbose. Delivery is
//! best-effort across all configured sinks; a sink failure is logged
//! and never interrupts the cycle that produced the message.

pub mod slack;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error};

use crate::types::NotificationLevel;

#[cfg(test)]
use mockall::automock;

/// A single delivery channel.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, text: &str) -> Result<()>;
}

/// Fan-out over all configured sinks with level filtering.
pub struct NotificationService {
    level: NotificationLevel,
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl NotificationService {
    pub fn new(level: NotificationLevel, sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { level, sinks }
    }

    /// Deliver `text` to every sink, subject to the level filter.
    /// Failures are logged per sink and swallowed.
    pub async fn notify(&self, text: &str, level: NotificationLevel) {
        if level == NotificationLevel::Verbose && self.level == NotificationLevel::Info {
            debug!(text, "suppressing verbose notification");
            return;
        }
        for sink in &self.sinks {
            if let Err(err) = sink.send(text).await {
                error!(sink = sink.name(), error = %err, "Failed to deliver notification");
            }
        }
    }
}
