//! In-process typed pub/sub spine connecting producers, the classifier,
//! the engines, and the push layer.
//!
//! Each subscriber owns a bounded queue. A full queue drops that
//! subscriber's oldest message (other subscribers are unaffected) and
//! bumps a per-subscriber counter; `publish` never blocks on a slow
//! subscriber. Delivery is at-most-once, ordered per subscriber.

use argus_common::protocol::ServerMessage;
use argus_common::types::{
    ActionCompletionInfo, ActionRequestInfo, Alert, AlertStatus, BudgetSnapshot, Event,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Bus topics. Every message maps to exactly one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    TelemetryRaw,
    EventsClassified,
    AlertsFired,
    AlertsState,
    ActionsRequested,
    ActionsCompleted,
    ReactDelta,
    BudgetUpdate,
    SystemStatus,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::TelemetryRaw => "telemetry.raw",
            Topic::EventsClassified => "events.classified",
            Topic::AlertsFired => "alerts.fired",
            Topic::AlertsState => "alerts.state",
            Topic::ActionsRequested => "actions.requested",
            Topic::ActionsCompleted => "actions.completed",
            Topic::ReactDelta => "react.delta",
            Topic::BudgetUpdate => "budget.update",
            Topic::SystemStatus => "system.status",
        }
    }

    /// Topics whose messages are forwarded to push clients.
    pub const CLIENT_VISIBLE: [Topic; 7] = [
        Topic::AlertsFired,
        Topic::AlertsState,
        Topic::ActionsRequested,
        Topic::ActionsCompleted,
        Topic::ReactDelta,
        Topic::BudgetUpdate,
        Topic::SystemStatus,
    ];
}

/// A typed message on the bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    TelemetryRaw(Event),
    EventClassified(Event),
    AlertFired(Alert),
    AlertStateChanged {
        alert_id: String,
        status: AlertStatus,
        by: String,
    },
    ActionRequested(ActionRequestInfo),
    ActionCompleted(ActionCompletionInfo),
    ReactDelta(ServerMessage),
    BudgetUpdated(BudgetSnapshot),
    SystemStatus(serde_json::Value),
}

impl BusMessage {
    pub fn topic(&self) -> Topic {
        match self {
            BusMessage::TelemetryRaw(_) => Topic::TelemetryRaw,
            BusMessage::EventClassified(_) => Topic::EventsClassified,
            BusMessage::AlertFired(_) => Topic::AlertsFired,
            BusMessage::AlertStateChanged { .. } => Topic::AlertsState,
            BusMessage::ActionRequested(_) => Topic::ActionsRequested,
            BusMessage::ActionCompleted(_) => Topic::ActionsCompleted,
            BusMessage::ReactDelta(_) => Topic::ReactDelta,
            BusMessage::BudgetUpdated(_) => Topic::BudgetUpdate,
            BusMessage::SystemStatus(_) => Topic::SystemStatus,
        }
    }
}

struct SubQueue {
    inner: Mutex<VecDeque<BusMessage>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl SubQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<BusMessage>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, msg: BusMessage) {
        let mut q = self.lock();
        if q.len() >= self.capacity {
            q.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        q.push_back(msg);
        drop(q);
        self.notify.notify_one();
    }
}

struct SubscriberEntry {
    topics: Vec<Topic>,
    queue: Arc<SubQueue>,
}

/// Handle for receiving messages from one subscription.
pub struct Subscription {
    id: u64,
    queue: Arc<SubQueue>,
    bus: Arc<BusInner>,
}

impl Subscription {
    /// Receive the next message, waiting until one is available.
    pub async fn recv(&self) -> BusMessage {
        loop {
            if let Some(msg) = self.queue.lock().pop_front() {
                return msg;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<BusMessage> {
        self.queue.lock().pop_front()
    }

    /// Messages dropped from this subscriber's queue due to overflow.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

struct BusInner {
    subscribers: Mutex<HashMap<u64, SubscriberEntry>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn unsubscribe(&self, id: u64) {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.remove(&id);
    }
}

/// The event bus. Cheap to clone; all clones share the fan-out table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a subscriber for the given topics with a bounded queue.
    pub fn subscribe(&self, topics: &[Topic], capacity: usize) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        });
        let mut subs = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.insert(
            id,
            SubscriberEntry {
                topics: topics.to_vec(),
                queue: queue.clone(),
            },
        );
        Subscription {
            id,
            queue,
            bus: self.inner.clone(),
        }
    }

    /// Remove a subscriber. Idempotent.
    pub fn unsubscribe(&self, id: u64) {
        self.inner.unsubscribe(id);
    }

    /// Enqueue a message on every matching subscriber queue and return.
    pub fn publish(&self, msg: BusMessage) {
        let topic = msg.topic();
        let subs = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for entry in subs.values() {
            if entry.topics.contains(&topic) {
                entry.queue.push(msg.clone());
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_common::types::{EventPayload, MetricPayload, Severity};
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

    fn metric_event(name: &str, value: f64) -> Event {
        Event {
            id: argus_common::id::next_id(),
            timestamp: Utc::now(),
            source: "web-01".to_string(),
            severity: Severity::Info,
            message: String::new(),
            payload: EventPayload::Metric(MetricPayload {
                name: name.to_string(),
                value,
                labels: StdHashMap::new(),
            }),
        }
    }

    #[tokio::test]
    async fn delivers_only_subscribed_topics() {
        let bus = EventBus::new();
        let sub = bus.subscribe(&[Topic::EventsClassified], 16);

        bus.publish(BusMessage::TelemetryRaw(metric_event("cpu_percent", 10.0)));
        bus.publish(BusMessage::EventClassified(metric_event("cpu_percent", 20.0)));

        let msg = sub.recv().await;
        assert!(matches!(msg, BusMessage::EventClassified(_)));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn preserves_order_per_subscriber() {
        let bus = EventBus::new();
        let sub = bus.subscribe(&[Topic::TelemetryRaw], 16);

        for i in 0..5 {
            bus.publish(BusMessage::TelemetryRaw(metric_event("m", i as f64)));
        }
        for i in 0..5 {
            match sub.recv().await {
                BusMessage::TelemetryRaw(ev) => match ev.payload {
                    EventPayload::Metric(m) => assert_eq!(m.value, i as f64),
                    _ => panic!("wrong payload"),
                },
                _ => panic!("wrong topic"),
            }
        }
    }

    #[tokio::test]
    async fn drops_oldest_for_slow_subscriber_only() {
        let bus = EventBus::new();
        let slow = bus.subscribe(&[Topic::TelemetryRaw], 2);
        let fast = bus.subscribe(&[Topic::TelemetryRaw], 16);

        for i in 0..4 {
            bus.publish(BusMessage::TelemetryRaw(metric_event("m", i as f64)));
        }

        assert_eq!(slow.dropped(), 2);
        assert_eq!(fast.dropped(), 0);

        // The slow subscriber sees the newest two messages.
        match slow.recv().await {
            BusMessage::TelemetryRaw(ev) => match ev.payload {
                EventPayload::Metric(m) => assert_eq!(m.value, 2.0),
                _ => panic!("wrong payload"),
            },
            _ => panic!("wrong topic"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub = bus.subscribe(&[Topic::SystemStatus], 4);
        let id = sub.id();
        bus.unsubscribe(id);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe(&[Topic::SystemStatus], 4);
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }
}
