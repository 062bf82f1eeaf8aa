use crate::types::{FetchConfig, RelayError, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Shared HTTP client for listing pages, feeds and individual releases.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            last_request: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// GET a page as text, retrying transport failures and non-2xx answers.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    break;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RelayError::Parse(format!("no response from {}", url))))
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        self.apply_rate_limit(url).await?;

        debug!("Fetching {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(RelayError::Parse(format!(
                "HTTP {}: {} ({})",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                url
            )));
        }

        let body = response.text().await?;
        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }

    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let host = Url::parse(url)?.host_str().unwrap_or("").to_string();
        let wait_time = self.reserve_slot(&host).await;
        if !wait_time.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait_time);
            tokio::time::sleep(wait_time).await;
        }
        Ok(())
    }

    /// Book the next free request slot for `host` and return how long to wait
    /// for it. The map lock is released before anyone sleeps.
    async fn reserve_slot(&self, host: &str) -> Duration {
        let min_interval = Duration::from_millis(self.config.min_host_interval_ms);
        let now = Instant::now();

        let mut last_request = self.last_request.lock().await;
        let slot = match last_request.get(host) {
            Some(previous) => (*previous + min_interval).max(now),
            None => now,
        };
        last_request.insert(host.to_string(), slot);

        slot.saturating_duration_since(now)
    }
}
