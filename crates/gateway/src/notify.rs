//! Operator notification sinks.

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    ladderbot_channels::NotificationSink,
    serde::Serialize,
    tracing::warn,
};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

/// Posts `{"content": "..."}` to a chat webhook URL.
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { content: message })
            .send()
            .await
            .context("webhook request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("webhook returned {status}: {body}");
        }
        Ok(())
    }
}

/// Writes notifications to the log when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, message: &str) -> Result<()> {
        warn!(notification = message, "operator notification");
        Ok(())
    }
}
