use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::formats::WebhookMessage;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Best-effort sink for run reports. Implementations swallow their own
/// failures so a dead chat channel never fails a run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Posts `{"content": message}` to a Discord-compatible webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) {
        let result = self
            .client
            .post(&self.url)
            .json(&WebhookMessage { content: message })
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        if let Err(err) = result {
            tracing::warn!(?err, "failed sending webhook notification");
        }
    }
}

/// Used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        tracing::info!(message, "notification");
    }
}

pub fn from_webhook(webhook: Option<&str>) -> anyhow::Result<Arc<dyn Notifier>> {
    match webhook.map(str::trim).filter(|w| !w.is_empty()) {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url)?)),
        None => {
            tracing::warn!("no discord_webhook configured; notifications go to the log only");
            Ok(Arc::new(LogNotifier))
        }
    }
}
