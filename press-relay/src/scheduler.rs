use crate::hub::BroadcastHub;
use crate::store::EventStore;
use crate::traits::ExtractionProvider;
use crate::types::{CandidateItem, CycleReport, RelayError, Result};
use crate::Fetcher;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RETENTION_SWEEP: Duration = Duration::from_secs(60 * 60);

/// Drives fetch -> dedupe -> complete -> persist -> publish for every topic.
///
/// Each topic gets its own periodic task. A per-topic mutex wraps every cycle,
/// so a diagnostic `run_once` can never overlap the periodic one.
pub struct Scheduler {
    store: Arc<EventStore>,
    hub: Arc<BroadcastHub>,
    fetcher: Arc<Fetcher>,
    providers: Vec<Arc<dyn ExtractionProvider>>,
    interval: Duration,
    retention: Option<chrono::Duration>,
    cycle_locks: HashMap<String, Arc<Mutex<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<EventStore>,
        hub: Arc<BroadcastHub>,
        fetcher: Arc<Fetcher>,
        providers: Vec<Arc<dyn ExtractionProvider>>,
        interval: Duration,
    ) -> Self {
        let cycle_locks = providers
            .iter()
            .map(|p| (p.topic().to_string(), Arc::new(Mutex::new(()))))
            .collect();

        Self {
            store,
            hub,
            fetcher,
            providers,
            interval,
            retention: None,
            cycle_locks,
        }
    }

    /// Keep only events younger than `retention` in the replay log.
    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn topics(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.topic().to_string()).collect()
    }

    /// Run a single cycle for `topic` right now, outside the periodic tasks.
    pub async fn run_once(&self, topic: &str) -> Result<CycleReport> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.topic() == topic)
            .cloned()
            .ok_or_else(|| RelayError::UnknownTopic(topic.to_string()))?;
        self.run_cycle(provider.as_ref()).await
    }

    async fn run_cycle(&self, provider: &dyn ExtractionProvider) -> Result<CycleReport> {
        let topic = provider.topic().to_string();
        let lock = self
            .cycle_locks
            .get(&topic)
            .cloned()
            .ok_or_else(|| RelayError::UnknownTopic(topic.clone()))?;
        let _cycle = lock.lock().await;

        let candidates = provider
            .list_candidates(&self.fetcher)
            .await
            .map_err(|e| RelayError::Listing {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

        let mut report = CycleReport {
            topic: topic.clone(),
            listed: candidates.len(),
            ..Default::default()
        };

        let fresh = self.store.filter_new(candidates).await?;
        report.new = fresh.len();
        info!("{}: {} releases ({} new)", topic, report.listed, report.new);

        for mut item in fresh {
            if !item.complete {
                if let Err(e) = self.complete(provider, &mut item).await {
                    warn!("{}: skipping {}: {}", topic, item.permalink, e);
                    report.skipped += 1;
                    continue;
                }
            }

            let event = match self.store.append(&item).await {
                Ok(event) => event,
                Err(RelayError::Duplicate { permalink, .. }) => {
                    warn!("{}: {} was stored by another writer", topic, permalink);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("{}: failed to store {}: {}", topic, item.permalink, e);
                    return Err(e);
                }
            };

            let receivers = self.hub.publish(&event).await;
            info!("{}: stashed {} as event {}", topic, event.item.permalink, event.id);
            debug!("{}: event {} sent to {} subscribers", topic, event.id, receivers);
            report.stored += 1;
        }

        Ok(report)
    }

    async fn complete(&self, provider: &dyn ExtractionProvider, item: &mut CandidateItem) -> Result<()> {
        let completion_error = |item: &CandidateItem, e: RelayError| RelayError::Completion {
            permalink: item.permalink.clone(),
            reason: e.to_string(),
        };

        let raw = provider
            .fetch_raw(&self.fetcher, item)
            .await
            .map_err(|e| completion_error(item, e))?;
        provider
            .complete_item(item, &raw)
            .map_err(|e| completion_error(item, e))?;

        item.complete = true;
        Ok(())
    }

    /// Start one periodic task per topic, plus the retention sweep when
    /// configured. Everything stops once `shutdown` is cancelled; a cycle in
    /// flight is abandoned between appends.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.providers.len() + 1);

        for provider in self.providers.clone() {
            let scheduler = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                scheduler.drive(provider, shutdown).await;
            }));
        }

        if let Some(retention) = self.retention {
            let store = self.store.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                sweep_retention(store, retention, shutdown).await;
            }));
        }

        info!(
            "Scheduler started for {} topics, polling every {:?}",
            self.providers.len(),
            self.interval
        );
        handles
    }

    async fn drive(&self, provider: Arc<dyn ExtractionProvider>, shutdown: CancellationToken) {
        let topic = provider.topic().to_string();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("{}: abandoning cycle for shutdown", topic);
                    break;
                }
                result = self.run_cycle(provider.as_ref()) => match result {
                    Ok(report) => info!(
                        "{}: cycle done, {} stored, {} skipped",
                        topic, report.stored, report.skipped
                    ),
                    Err(e) => error!("{}: cycle failed: {}", topic, e),
                },
            }
        }

        debug!("{}: poller stopped", topic);
    }
}

async fn sweep_retention(store: Arc<EventStore>, retention: chrono::Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(RETENTION_SWEEP);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = store.trim_before(Utc::now() - retention).await {
            error!("Retention sweep failed: {}", e);
        }
    }
}
