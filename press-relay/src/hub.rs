use crate::store::EventStore;
use crate::types::{PersistedEvent, RelayError, Result};
use futures::Stream;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_REPLAY_BATCH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    ReplayingBacklog,
    Streaming,
    Closed,
}

/// Per-topic fan-out of freshly stored events, with replay from the store.
///
/// Each topic owns a bounded broadcast channel. Publishing never waits on a
/// receiver; a subscriber that falls `capacity` events behind is cut off on
/// its next read instead of holding anyone else up.
pub struct BroadcastHub {
    store: Arc<EventStore>,
    channels: RwLock<HashMap<String, broadcast::Sender<PersistedEvent>>>,
    capacity: usize,
    replay_batch: usize,
}

impl BroadcastHub {
    pub fn new(store: Arc<EventStore>, capacity: usize) -> Self {
        Self {
            store,
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            replay_batch: DEFAULT_REPLAY_BATCH,
        }
    }

    /// How many stored events a resumed subscription buffers at a time.
    pub fn with_replay_batch(mut self, batch: usize) -> Self {
        self.replay_batch = batch.max(1);
        self
    }

    pub async fn register(&self, topic: &str) {
        let mut channels = self.channels.write().await;
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    pub async fn topics(&self) -> Vec<String> {
        let channels = self.channels.read().await;
        let mut topics: Vec<String> = channels.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let channels = self.channels.read().await;
        channels.get(topic).map(|s| s.receiver_count()).unwrap_or(0)
    }

    /// Open a subscription on `topic`.
    ///
    /// With a cursor, everything stored after it is delivered first, then the
    /// live stream. The live receiver is registered before the backlog is read,
    /// so an event stored in between shows up in one or both; the subscription
    /// drops live events it has already handed out.
    ///
    /// A cursor past the newest stored event of the topic is clamped to it, so
    /// a stale `Last-Event-ID` never hides live events.
    pub async fn subscribe(&self, topic: &str, cursor: Option<i64>) -> Result<Subscription> {
        let live = {
            let channels = self.channels.read().await;
            channels
                .get(topic)
                .ok_or_else(|| RelayError::UnknownTopic(topic.to_string()))?
                .subscribe()
        };

        let id = Uuid::new_v4();
        let mut subscription = Subscription {
            id,
            topic: topic.to_string(),
            store: self.store.clone(),
            replay_batch: self.replay_batch,
            backlog: VecDeque::new(),
            more_backlog: false,
            live: Some(live),
            last_delivered: None,
            state: SubscriptionState::Streaming,
        };

        if let Some(cursor) = cursor {
            // read before the backlog: anything stored later has a higher id
            let head = self.store.latest_id(topic).await?.unwrap_or(0);
            subscription.last_delivered = Some(cursor);
            subscription.more_backlog = true;
            subscription.fetch_backlog().await?;

            if subscription.backlog.is_empty() {
                subscription.last_delivered = Some(cursor.min(head));
            } else {
                subscription.state = SubscriptionState::ReplayingBacklog;
            }
        }

        info!(
            "Subscriber {} joined {} (cursor {:?}, {} buffered to replay)",
            id,
            topic,
            cursor,
            subscription.backlog.len()
        );

        Ok(subscription)
    }

    /// Hand `event` to every current subscriber of its topic.
    /// Returns how many subscribers it reached.
    pub async fn publish(&self, event: &PersistedEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&event.topic) {
            // send only fails when nobody is listening
            Some(sender) => sender.send(event.clone()).unwrap_or(0),
            None => {
                warn!("Publish to unregistered topic {} (event {})", event.topic, event.id);
                0
            }
        }
    }

    pub fn unsubscribe(&self, subscription: &mut Subscription) {
        subscription.close();
    }
}

pub struct Subscription {
    id: Uuid,
    topic: String,
    store: Arc<EventStore>,
    replay_batch: usize,
    backlog: VecDeque<PersistedEvent>,
    /// Stored events may follow what is buffered in `backlog`.
    more_backlog: bool,
    live: Option<broadcast::Receiver<PersistedEvent>>,
    last_delivered: Option<i64>,
    state: SubscriptionState,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn last_delivered(&self) -> Option<i64> {
        self.last_delivered
    }

    /// Next event in id order. `Ok(None)` once the subscription is closed.
    ///
    /// Falling too far behind the live stream closes the subscription and
    /// yields [`RelayError::Delivery`].
    pub async fn recv(&mut self) -> Result<Option<PersistedEvent>> {
        if self.state == SubscriptionState::ReplayingBacklog {
            if let Some(event) = self.next_from_backlog().await? {
                return Ok(Some(event));
            }
            self.state = SubscriptionState::Streaming;
        }

        loop {
            let Some(live) = self.live.as_mut() else {
                return Ok(None);
            };

            match live.recv().await {
                Ok(event) => {
                    if matches!(self.last_delivered, Some(last) if event.id <= last) {
                        debug!("Subscriber {} already has event {}", self.id, event.id);
                        continue;
                    }
                    self.last_delivered = Some(event.id);
                    return Ok(Some(event));
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Subscriber {} on {} fell {} events behind, closing", self.id, self.topic, missed);
                    self.close();
                    return Err(RelayError::Delivery {
                        subscriber: self.id.to_string(),
                        reason: format!("fell {} events behind", missed),
                    });
                }
                Err(RecvError::Closed) => {
                    self.close();
                    return Ok(None);
                }
            }
        }
    }

    async fn next_from_backlog(&mut self) -> Result<Option<PersistedEvent>> {
        if self.backlog.is_empty() && self.more_backlog {
            if let Err(e) = self.fetch_backlog().await {
                warn!("Subscriber {} lost its backlog on {}: {}", self.id, self.topic, e);
                self.close();
                return Err(e);
            }
        }

        let Some(event) = self.backlog.pop_front() else {
            return Ok(None);
        };
        self.last_delivered = Some(event.id);
        if self.backlog.is_empty() && !self.more_backlog {
            self.state = SubscriptionState::Streaming;
        }
        Ok(Some(event))
    }

    /// Buffer the next page of stored events after the last one delivered.
    async fn fetch_backlog(&mut self) -> Result<()> {
        let after = self.last_delivered.unwrap_or(0);
        let page = self.store.replay_page(&self.topic, after, self.replay_batch).await?;
        self.more_backlog = page.len() >= self.replay_batch;
        self.backlog.extend(page);
        Ok(())
    }

    /// Stop receiving and release anything still buffered. Idempotent.
    pub fn close(&mut self) {
        if self.state != SubscriptionState::Closed {
            debug!("Subscriber {} left {}", self.id, self.topic);
        }
        self.state = SubscriptionState::Closed;
        self.live = None;
        self.backlog = VecDeque::new();
        self.more_backlog = false;
    }

    /// Turn the subscription into a stream that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<PersistedEvent>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut subscription = state?;
            match subscription.recv().await {
                Ok(Some(event)) => Some((Ok(event), Some(subscription))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
