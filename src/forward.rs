use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::GrabError;
use crate::formats::{AddLinksRequest, AddLinksResponse};

const FORWARD_TIMEOUT: Duration = Duration::from_secs(15);

/// Downstream service that takes resolved download links.
#[async_trait]
pub trait LinkSink: Send + Sync {
    async fn submit(&self, request: &AddLinksRequest) -> Result<(), GrabError>;
}

#[derive(Debug, Clone)]
pub struct HttpLinkSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLinkSink {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            anyhow::bail!("api_add_url is empty");
        }
        let client = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()
            .context("build link sink http client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl LinkSink for HttpLinkSink {
    async fn submit(&self, request: &AddLinksRequest) -> Result<(), GrabError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|err| GrabError::Forward(format!("POST {}: {err}", self.endpoint)))?;

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        check_reply(&self.endpoint, status, &raw)?;

        tracing::debug!(endpoint = %self.endpoint, links = request.links.len(), "links forwarded");
        Ok(())
    }
}

/// A 2xx reply must carry a JSON body, and an explicit `"success": false` is a
/// rejection even with a 2xx status.
fn check_reply(endpoint: &str, status: StatusCode, raw: &str) -> Result<(), GrabError> {
    let body = serde_json::from_str::<AddLinksResponse>(raw);
    if !status.is_success() {
        let message = body.ok().and_then(|b| b.error).unwrap_or_else(|| raw.to_owned());
        return Err(GrabError::Forward(format!("POST {endpoint} ({status}): {message}")));
    }

    match body {
        Ok(body) if body.success == Some(false) => Err(GrabError::Forward(format!(
            "POST {endpoint} rejected: {}",
            body.error.unwrap_or_else(|| "no reason given".to_owned())
        ))),
        Ok(_) => Ok(()),
        Err(err) => Err(GrabError::Forward(format!(
            "POST {endpoint} ({status}): unreadable reply: {err}"
        ))),
    }
}
