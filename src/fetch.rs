use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};

use crate::config::FetchConfig;
use crate::error::GrabError;

/// Longest response body kept on a failed fetch.
const BODY_SNIPPET_CHARS: usize = 300;

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, GrabError>;
}

/// Single GET per call. No retries: the next scheduled run is the retry.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build page fetch http client")?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, GrabError> {
        let fail = |status: Option<u16>, message: String| GrabError::Fetch {
            url: url.to_owned(),
            status,
            message,
        };

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|err| fail(None, describe(&err)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(fail(
                Some(status.as_u16()),
                format!("status {status}: {}", snippet(&body)),
            ));
        }

        tracing::debug!(url, %status, "fetched page");
        response
            .text()
            .await
            .map_err(|err| fail(Some(status.as_u16()), format!("read body: {}", describe(&err))))
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= BODY_SNIPPET_CHARS {
        return body.to_owned();
    }
    let mut out: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
    out.push('…');
    out
}
