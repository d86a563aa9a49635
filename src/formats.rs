use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of the episode log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub id: u64,
    pub series_key: String,
    pub season: Option<i64>,
    /// `-1` when no number could be parsed.
    pub episode_number: i64,
    pub episode_link: String,
    pub host: Option<String>,
    pub quality: Option<String>,
    pub retrieved_at: DateTime<Utc>,
}

/// Body accepted by the link-acquisition endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLinksRequest {
    pub links: Vec<String>,
    #[serde(
        rename = "packageName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub package_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLinksResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookMessage<'a> {
    pub content: &'a str,
}
