//! Operator alerts

use async_trait::async_trait;
use footfall_common::config::AlertingConfig;
use footfall_common::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const ALERT_SUBJECT: &str = "Footfall engine alert";
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers a message to an operator destination
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, message: &str, destination: &str) -> Result<()>;
}

/// Logs alerts at error level
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, message: &str, destination: &str) -> Result<()> {
        error!(destination, "{}: {}", ALERT_SUBJECT, message);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    destination: &'a str,
    message: &'a str,
}

/// POSTs alerts as JSON
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, message: &str, destination: &str) -> Result<()> {
        let payload = WebhookPayload {
            subject: ALERT_SUBJECT,
            destination,
            message,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("alert webhook: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("alert webhook returned HTTP {}", status.as_u16())));
        }
        info!(destination, "Sent alert via webhook");
        Ok(())
    }
}

/// Webhook sink when a URL is configured, otherwise log-only
pub fn sink_from_config(config: &AlertingConfig) -> Result<Arc<dyn AlertSink>> {
    Ok(match &config.webhook_url {
        Some(url) => Arc::new(WebhookAlertSink::new(url.clone())?),
        None => Arc::new(TracingAlertSink),
    })
}
