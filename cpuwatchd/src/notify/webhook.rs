use super::NotificationSink;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// POSTs each alert as JSON to a fixed URL.
#[derive(Clone)]
pub struct WebhookSink {
    client: Client,
    endpoint: Url,
}

impl WebhookSink {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("invalid webhook URL")?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&WebhookPayload { subject, body })
            .send()
            .await
            .context("webhook request failed")?;
        if !resp.status().is_success() {
            return Err(anyhow!("webhook returned status {}", resp.status()));
        }
        Ok(())
    }
}
