#![allow(dead_code)]

use async_trait::async_trait;
use press_relay::{BroadcastHub, CandidateItem, EventStore, ExtractionProvider, Fetcher, RelayError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// A fresh store in its own temporary directory. Keep the `TempDir` alive
/// for as long as the store is in use.
pub async fn temp_store() -> (TempDir, Arc<EventStore>) {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let store = EventStore::open(dir.path().join("events.db"))
        .await
        .expect("open store");
    (dir, Arc::new(store))
}

pub async fn hub_for(store: &Arc<EventStore>, topics: &[&str], capacity: usize) -> Arc<BroadcastHub> {
    let hub = BroadcastHub::new(store.clone(), capacity);
    for topic in topics {
        hub.register(topic).await;
    }
    Arc::new(hub)
}

pub fn item(topic: &str, permalink: &str) -> CandidateItem {
    let mut item = CandidateItem::new(topic, permalink).with_title(format!("Release at {}", permalink));
    item.content = format!("<p>Body of {}</p>", permalink);
    item.complete = true;
    item
}

/// Fails the test instead of hanging when `future` never finishes.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

/// True when `future` is still pending after a short grace period.
pub async fn stays_pending<T>(future: impl Future<Output = T>) -> bool {
    tokio::time::timeout(Duration::from_millis(150), future).await.is_err()
}

pub fn fetcher() -> Arc<Fetcher> {
    Arc::new(Fetcher::new(Default::default()).expect("fetcher"))
}

/// In-memory source: canned listing, canned pages, switchable failures.
pub struct StubProvider {
    topic: String,
    listing: Mutex<Vec<CandidateItem>>,
    pages: Mutex<HashMap<String, String>>,
    fail_listing: AtomicBool,
    fetch_delay: Duration,
    close_on_fetch: Option<Arc<EventStore>>,
}

impl StubProvider {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            listing: Mutex::new(Vec::new()),
            pages: Mutex::new(HashMap::new()),
            fail_listing: AtomicBool::new(false),
            fetch_delay: Duration::ZERO,
            close_on_fetch: None,
        }
    }

    /// Every page fetch takes `delay`.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Close `store` while fetching a page, so the following append fails.
    pub fn closing_store_on_fetch(mut self, store: Arc<EventStore>) -> Self {
        self.close_on_fetch = Some(store);
        self
    }

    /// An incomplete listing entry whose page holds `body`.
    pub fn with_page(self, permalink: &str, body: &str) -> Self {
        self.listing
            .lock()
            .unwrap()
            .push(CandidateItem::new(&self.topic, permalink).with_title(format!("Listed {}", permalink)));
        self.pages
            .lock()
            .unwrap()
            .insert(permalink.to_string(), body.to_string());
        self
    }

    /// An incomplete listing entry whose page cannot be fetched.
    pub fn with_missing_page(self, permalink: &str) -> Self {
        self.listing
            .lock()
            .unwrap()
            .push(CandidateItem::new(&self.topic, permalink));
        self
    }

    /// A listing entry that needs no completion.
    pub fn with_complete(self, permalink: &str) -> Self {
        self.listing.lock().unwrap().push(item(&self.topic, permalink));
        self
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExtractionProvider for StubProvider {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn list_candidates(&self, _fetcher: &Fetcher) -> Result<Vec<CandidateItem>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RelayError::Parse("listing page unavailable".to_string()));
        }
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn fetch_raw(&self, _fetcher: &Fetcher, item: &CandidateItem) -> Result<String> {
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        if let Some(store) = &self.close_on_fetch {
            store.close().await;
        }
        self.pages
            .lock()
            .unwrap()
            .get(&item.permalink)
            .cloned()
            .ok_or_else(|| RelayError::Parse(format!("404 for {}", item.permalink)))
    }

    fn complete_item(&self, item: &mut CandidateItem, raw: &str) -> Result<()> {
        if raw.trim().is_empty() {
            return Err(RelayError::Parse("empty page".to_string()));
        }
        item.content = raw.to_string();
        item.complete = true;
        Ok(())
    }
}
