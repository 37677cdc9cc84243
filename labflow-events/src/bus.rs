//! ABOUTME: ProgressBus implementation with per-document pub/sub fan-out
//! ABOUTME: Bounded per-subscriber queues, drop-oldest overflow, non-blocking publish

use dashmap::DashMap;
use labflow_core::types::ProgressEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Process-wide progress broker keyed by document id.
///
/// `publish` never blocks and never fails: a subscriber that has fallen
/// behind loses its oldest queued events, not the publisher's time.
/// Terminal state is also persisted in the record store, so a lagging
/// subscriber recovers by re-reading current state on reconnect.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    topics: DashMap<String, Vec<Arc<SubscriberState>>>,
    capacity: usize,
    next_subscriber_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

struct SubscriberState {
    id: u64,
    queue: Mutex<VecDeque<ProgressEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

impl SubscriberState {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Wake current waiters and leave a permit for a future recv.
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

/// Snapshot of bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub events_published: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub active_subscribers: usize,
}

impl ProgressBus {
    /// Create a bus with the default queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a bus with a custom per-subscriber queue capacity (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                capacity: capacity.max(1),
                next_subscriber_id: AtomicU64::new(0),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event to all live subscribers of its document.
    ///
    /// Non-blocking: full queues drop their oldest event to make room.
    pub fn publish(&self, event: &ProgressEvent) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let Some(mut entry) = self.inner.topics.get_mut(&event.document_id) else {
            trace!(document_id = %event.document_id, "no subscribers for event");
            return;
        };

        entry.retain(|subscriber| !subscriber.closed.load(Ordering::Acquire));
        for subscriber in entry.iter() {
            {
                let mut queue = subscriber.queue.lock();
                if queue.len() >= self.inner.capacity {
                    queue.pop_front();
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        document_id = %event.document_id,
                        subscriber_id = subscriber.id,
                        "subscriber queue full, dropping oldest event"
                    );
                }
                queue.push_back(event.clone());
            }
            self.inner.delivered.fetch_add(1, Ordering::Relaxed);
            subscriber.notify.notify_one();
        }
    }

    /// Subscribe to a document's progress events.
    ///
    /// Events arrive in publish order. Dropping the subscription
    /// unsubscribes.
    pub fn subscribe(&self, document_id: &str) -> Subscription {
        let state = Arc::new(SubscriberState {
            id: self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed),
            queue: Mutex::new(VecDeque::with_capacity(self.inner.capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        self.inner
            .topics
            .entry(document_id.to_string())
            .or_default()
            .push(Arc::clone(&state));

        debug!(document_id, subscriber_id = state.id, "subscription created");
        Subscription {
            document_id: document_id.to_string(),
            state,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Close every subscription for a document (used when the document is
    /// deleted and no terminal event will ever arrive).
    pub fn close_topic(&self, document_id: &str) {
        if let Some((_, subscribers)) = self.inner.topics.remove(document_id) {
            for subscriber in subscribers {
                subscriber.close();
            }
        }
    }

    /// Number of live subscribers for one document.
    pub fn subscriber_count(&self, document_id: &str) -> usize {
        self.inner
            .topics
            .get(document_id)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|s| !s.closed.load(Ordering::Acquire))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Current counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            events_published: self.inner.published.load(Ordering::Relaxed),
            events_delivered: self.inner.delivered.load(Ordering::Relaxed),
            events_dropped: self.inner.dropped.load(Ordering::Relaxed),
            active_subscribers: self
                .inner
                .topics
                .iter()
                .map(|entry| {
                    entry
                        .value()
                        .iter()
                        .filter(|s| !s.closed.load(Ordering::Acquire))
                        .count()
                })
                .sum(),
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one subscription.
pub struct Subscription {
    document_id: String,
    state: Arc<SubscriberState>,
    bus: Arc<BusInner>,
}

impl Subscription {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Receive the next event, waiting if the queue is empty. Returns `None`
    /// once the subscription is closed and drained.
    pub async fn recv(&self) -> Option<ProgressEvent> {
        loop {
            if let Some(event) = self.state.queue.lock().pop_front() {
                return Some(event);
            }
            if self.state.closed.load(Ordering::Acquire) {
                return None;
            }
            self.state.notify.notified().await;
        }
    }

    /// Non-waiting receive.
    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.state.queue.lock().pop_front()
    }

    /// Close this subscription. Idempotent; pending `recv` calls return
    /// `None` once the queue is drained.
    pub fn unsubscribe(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.close();

        let mut remove_topic = false;
        if let Some(mut entry) = self.bus.topics.get_mut(&self.document_id) {
            entry.retain(|subscriber| subscriber.id != self.state.id);
            remove_topic = entry.is_empty();
        }
        if remove_topic {
            self.bus
                .topics
                .remove_if(&self.document_id, |_, subscribers| subscribers.is_empty());
        }
        debug!(
            document_id = %self.document_id,
            subscriber_id = self.state.id,
            "subscription closed"
        );
    }

    /// Adapt this subscription into a `futures::Stream` of events.
    pub fn into_stream(self) -> impl futures::Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |subscription| async move {
            subscription
                .recv()
                .await
                .map(|event| (event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use labflow_core::types::{DocumentStatus, ProcessingStage};

    fn event(document_id: &str, progress: u8) -> ProgressEvent {
        ProgressEvent {
            document_id: document_id.to_string(),
            status: DocumentStatus::Processing,
            processing_stage: ProcessingStage::OcrExtraction,
            progress,
            filename: "report.pdf".to_string(),
            uploaded_at: Utc::now(),
            raw_text: None,
            extracted_data: None,
            ai_insights: None,
            error_message: None,
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn basic_pub_sub() {
        let bus = ProgressBus::new();
        let subscription = bus.subscribe("doc-1");

        bus.publish(&event("doc-1", 10));

        let received = subscription.recv().await.unwrap();
        assert_eq!(received.progress, 10);
    }

    #[tokio::test]
    async fn events_are_keyed_by_document() {
        let bus = ProgressBus::new();
        let sub_a = bus.subscribe("doc-a");
        let sub_b = bus.subscribe("doc-b");

        bus.publish(&event("doc-a", 10));
        bus.publish(&event("doc-b", 50));

        assert_eq!(sub_a.recv().await.unwrap().progress, 10);
        assert_eq!(sub_b.recv().await.unwrap().progress, 50);
        assert!(sub_a.try_recv().is_none());
    }

    #[tokio::test]
    async fn publish_order_is_preserved_per_subscriber() {
        let bus = ProgressBus::new();
        let subscription = bus.subscribe("doc-1");

        for progress in [10, 50, 90, 100] {
            bus.publish(&event("doc-1", progress));
        }

        for expected in [10, 50, 90, 100] {
            assert_eq!(subscription.recv().await.unwrap().progress, expected);
        }
    }

    #[tokio::test]
    async fn full_queue_drops_oldest() {
        let bus = ProgressBus::with_capacity(2);
        let subscription = bus.subscribe("doc-1");

        bus.publish(&event("doc-1", 1));
        bus.publish(&event("doc-1", 2));
        bus.publish(&event("doc-1", 3));

        assert_eq!(subscription.recv().await.unwrap().progress, 2);
        assert_eq!(subscription.recv().await.unwrap().progress, 3);
        assert!(subscription.try_recv().is_none());
        assert_eq!(bus.stats().events_dropped, 1);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let bus = ProgressBus::with_capacity(2);
        let slow = bus.subscribe("doc-1");
        let fast = bus.subscribe("doc-1");

        for progress in 1..=5 {
            bus.publish(&event("doc-1", progress));
            assert_eq!(fast.recv().await.unwrap().progress, progress);
        }

        // The slow subscriber is capped at its queue capacity.
        assert_eq!(slow.recv().await.unwrap().progress, 4);
        assert_eq!(slow.recv().await.unwrap().progress, 5);
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_closes_recv() {
        let bus = ProgressBus::new();
        let subscription = bus.subscribe("doc-1");

        subscription.unsubscribe();
        subscription.unsubscribe();

        assert!(subscription.recv().await.is_none());
        assert_eq!(bus.subscriber_count("doc-1"), 0);
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let bus = ProgressBus::new();
        {
            let _subscription = bus.subscribe("doc-1");
            assert_eq!(bus.subscriber_count("doc-1"), 1);
        }
        assert_eq!(bus.subscriber_count("doc-1"), 0);
    }

    #[tokio::test]
    async fn close_topic_ends_subscriptions() {
        let bus = ProgressBus::new();
        let subscription = bus.subscribe("doc-1");

        bus.publish(&event("doc-1", 10));
        bus.close_topic("doc-1");

        // Queued events drain, then the subscription reports closed.
        assert_eq!(subscription.recv().await.unwrap().progress, 10);
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_a_no_op() {
        let bus = ProgressBus::new();
        bus.publish(&event("doc-1", 10));
        assert_eq!(bus.stats().events_published, 1);
        assert_eq!(bus.stats().events_delivered, 0);
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let bus = ProgressBus::new();
        let subscription = bus.subscribe("doc-1");

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                bus.publish(&event("doc-1", 42));
            })
        };

        let received = subscription.recv().await.unwrap();
        assert_eq!(received.progress, 42);
        publisher.await.unwrap();
    }
}
