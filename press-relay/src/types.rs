use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A press release as found on a source, possibly still missing its body.
///
/// `(topic, permalink)` is the identity of the item; every other field may
/// differ between two sightings of the same release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateItem {
    pub title: String,
    pub topic: String,
    pub permalink: String,
    pub published_at: Option<DateTime<Utc>>,
    pub content: String,
    /// Set once title, date and content have all been filled in.
    #[serde(skip)]
    pub complete: bool,
}

impl CandidateItem {
    /// A listing entry that only knows where the full release lives.
    pub fn new(topic: impl Into<String>, permalink: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            topic: topic.into(),
            permalink: permalink.into(),
            published_at: None,
            content: String::new(),
            complete: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.topic, &self.permalink)
    }
}

/// An item accepted by the store, stamped with its sequence id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedEvent {
    pub id: i64,
    pub topic: String,
    pub item: CandidateItem,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_redirects: usize,
    /// Minimum spacing between two requests to the same host.
    pub min_host_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "press-relay/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 2,
            max_redirects: 5,
            min_host_interval_ms: 1_000,
        }
    }
}

/// Outcome of one ingestion cycle for one topic.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CycleReport {
    pub topic: String,
    /// Candidates returned by the listing.
    pub listed: usize,
    /// Candidates the store had never seen.
    pub new: usize,
    /// Items appended and published.
    pub stored: usize,
    /// Items dropped because completion failed or another writer won.
    pub skipped: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Listing failed for {topic}: {reason}")]
    Listing { topic: String, reason: String },

    #[error("Completion failed for {permalink}: {reason}")]
    Completion { permalink: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Subscriber {subscriber} dropped: {reason}")]
    Delivery { subscriber: String, reason: String },

    #[error("Already stored: {topic} {permalink}")]
    Duplicate { topic: String, permalink: String },

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
