#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **grain-bus-core** – Topic fan-out pub/sub for Grain.
//!
//! The bus keys subscriptions by topic (by default an event's kind) and
//! gives every subscription its own bounded queue. `publish` awaits queue
//! capacity on every matching subscription, so a slow subscriber slows the
//! publisher down but never causes a message to be dropped: the bus chooses
//! latency over loss. Delivery order per subscription is publish order;
//! nothing is coordinated across subscriptions.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use grain_types::Event;

/// Default per-subscription queue capacity.
pub const DEFAULT_BUFFER: usize = 1024;

//─────────────────────────────
//  Configuration
//─────────────────────────────

/// Derives the topic a message is published under.
pub type TopicFn = Arc<dyn Fn(&Event) -> String + Send + Sync>;

/// Bus configuration.
#[derive(Clone)]
pub struct PubSubConfig {
    /// Per-subscription queue capacity.
    pub buffer: usize,
    /// Topic derivation; defaults to the event kind.
    pub topic_fn: TopicFn,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_BUFFER,
            topic_fn: Arc::new(|event: &Event| event.kind.clone()),
        }
    }
}

impl std::fmt::Debug for PubSubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubConfig")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

//─────────────────────────────
//  Bus
//─────────────────────────────

struct SubEntry {
    id: u64,
    tx: mpsc::Sender<Event>,
}

struct PubSubInner {
    topic_fn: TopicFn,
    buffer: usize,
    // topic → live subscription senders; guarded by a sync lock that is
    // never held across an await
    subs: Mutex<HashMap<String, Vec<SubEntry>>>,
    next_id: AtomicU64,
}

/// Topic-keyed fan-out bus with per-subscriber bounded buffering.
#[derive(Clone)]
pub struct PubSub {
    inner: Arc<PubSubInner>,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new(PubSubConfig::default())
    }
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("buffer", &self.inner.buffer)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl PubSub {
    /// Create a bus from the given configuration.
    pub fn new(config: PubSubConfig) -> Self {
        Self {
            inner: Arc::new(PubSubInner {
                topic_fn: config.topic_fn,
                buffer: config.buffer.max(1),
                subs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to a topic.
    ///
    /// The returned [`Subscription`] owns a bounded queue; dropping it
    /// unsubscribes. Messages published before the subscription existed are
    /// not replayed.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subs
            .lock()
            .expect("bus subscriber table poisoned")
            .entry(topic.clone())
            .or_default()
            .push(SubEntry { id, tx });
        debug!(topic = %topic, id, "bus subscription created");
        Subscription {
            id,
            topic,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Publish a message to every subscription of its topic.
    ///
    /// Blocks until all matching subscriptions have accepted the message.
    /// Subscriptions that were dropped mid-flight are pruned rather than
    /// treated as errors.
    pub async fn publish(&self, event: &Event) {
        let topic = (self.inner.topic_fn)(event);
        let targets: Vec<(u64, mpsc::Sender<Event>)> = {
            let subs = self
                .inner
                .subs
                .lock()
                .expect("bus subscriber table poisoned");
            subs.get(&topic)
                .map(|entries| entries.iter().map(|e| (e.id, e.tx.clone())).collect())
                .unwrap_or_default()
        };
        trace!(topic = %topic, fanout = targets.len(), "publishing");
        for (id, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                // Receiver went away between snapshot and send.
                self.remove(&topic, id);
            }
        }
    }

    /// Total number of live subscriptions across all topics.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subs
            .lock()
            .expect("bus subscriber table poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Number of live subscriptions for one topic.
    pub fn topic_subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subs
            .lock()
            .expect("bus subscriber table poisoned")
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Close every subscription; pending receivers observe end-of-stream.
    pub fn close(&self) {
        self.inner
            .subs
            .lock()
            .expect("bus subscriber table poisoned")
            .clear();
    }

    fn remove(&self, topic: &str, id: u64) {
        PubSubInner::remove(&self.inner, topic, id);
    }
}

impl PubSubInner {
    fn remove(inner: &Arc<PubSubInner>, topic: &str, id: u64) {
        let mut subs = inner.subs.lock().expect("bus subscriber table poisoned");
        if let Some(entries) = subs.get_mut(topic) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                subs.remove(topic);
            }
        }
    }
}

//─────────────────────────────
//  Subscription
//─────────────────────────────

/// One subscriber's end of a topic: a bounded queue of matching messages.
///
/// Implements [`Stream`] so multiple subscriptions can be merged with
/// `futures::stream::select_all`. Dropping the subscription unsubscribes
/// from the bus.
pub struct Subscription {
    id: u64,
    topic: String,
    rx: mpsc::Receiver<Event>,
    bus: Weak<PubSubInner>,
}

impl Subscription {
    /// The topic this subscription is attached to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next message; `None` means the bus closed the queue.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Detach from the bus, then drain and discard anything still queued.
    pub async fn unsubscribe(mut self) {
        self.detach();
        while self.rx.recv().await.is_some() {}
    }

    fn detach(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            PubSubInner::remove(&inner, &self.topic, self.id);
        }
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus has been closed and no longer accepts messages.
    #[error("bus closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn event(kind: &str) -> Event {
        Event::new(kind, Map::new())
    }

    #[tokio::test]
    async fn test_basic_fanout() {
        let bus = PubSub::default();
        let mut a = bus.subscribe("counter.created");
        let mut b = bus.subscribe("counter.created");

        bus.publish(&event("counter.created")).await;

        assert_eq!(a.recv().await.unwrap().kind, "counter.created");
        assert_eq!(b.recv().await.unwrap().kind, "counter.created");
    }

    #[tokio::test]
    async fn test_topic_isolation() {
        let bus = PubSub::default();
        let mut created = bus.subscribe("counter.created");
        let _renamed = bus.subscribe("counter.renamed");

        bus.publish(&event("counter.created")).await;

        assert_eq!(created.recv().await.unwrap().kind, "counter.created");
        assert_eq!(bus.topic_subscriber_count("counter.renamed"), 1);
    }

    #[tokio::test]
    async fn test_delivery_in_publish_order() {
        let bus = PubSub::default();
        let mut sub = bus.subscribe("t.inc");

        for i in 0..32 {
            let mut body = Map::new();
            body.insert("index".to_string(), serde_json::json!(i));
            bus.publish(&Event::new("t.inc", body)).await;
        }

        for i in 0..32 {
            let got = sub.recv().await.unwrap();
            assert_eq!(got.body["index"], serde_json::json!(i));
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_blocks_but_loses_nothing() {
        let bus = PubSub::new(PubSubConfig {
            buffer: 4,
            ..PubSubConfig::default()
        });
        let mut sub = bus.subscribe("t.inc");

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for _ in 0..64 {
                    bus.publish(&event("t.inc")).await;
                }
            })
        };

        let mut received = 0;
        while received < 64 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            if sub.recv().await.is_some() {
                received += 1;
            }
        }
        publisher.await.unwrap();
        assert_eq!(received, 64);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = PubSub::default();
        let sub = bus.subscribe("t.x");
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);

        // Publishing into a topic with no subscribers is a no-op.
        bus.publish(&event("t.x")).await;
    }

    #[tokio::test]
    async fn test_close_signals_end_of_stream() {
        let bus = PubSub::default();
        let mut sub = bus.subscribe("t.x");
        bus.close();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_custom_topic_fn() {
        let bus = PubSub::new(PubSubConfig {
            buffer: 8,
            topic_fn: Arc::new(|_| "all".to_string()),
        });
        let mut sub = bus.subscribe("all");
        bus.publish(&event("anything.goes")).await;
        assert_eq!(sub.recv().await.unwrap().kind, "anything.goes");
    }
}
