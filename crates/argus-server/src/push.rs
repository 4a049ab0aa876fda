//! Push layer: per-connection ordered queues with critical-message
//! eviction, the connection table, and the bus fan-out.

use argus_bus::{BusMessage, EventBus, Subscription, Topic};
use argus_common::protocol::{ServerBody, ServerMessage};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing;

/// Default bound on a connection's outbound queue.
pub const OUTBOUND_QUEUE_CAP: usize = 1024;

/// Expected client ping interval.
pub const HEARTBEAT_INTERVAL_SECS: i64 = 30;

/// Consecutive missed pings before the connection closes.
pub const HEARTBEAT_MISSES: i64 = 2;

/// Result of enqueueing on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Enqueued,
    /// The queue was full of critical messages and the incoming message
    /// was critical too: the connection must close with a backpressure
    /// reason.
    Overflowed,
}

/// Bounded FIFO with the overflow policy of the push protocol: ordinary
/// messages drop the oldest non-critical entry; critical messages evict
/// non-critical entries from the tail instead and force a close when the
/// queue holds nothing but critical traffic.
pub struct OutboundQueue {
    inner: Mutex<VecDeque<ServerMessage>>,
    capacity: usize,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ServerMessage>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, msg: ServerMessage) -> EnqueueResult {
        let mut q = self.lock();
        if q.len() < self.capacity {
            q.push_back(msg);
            drop(q);
            self.notify.notify_one();
            return EnqueueResult::Enqueued;
        }

        if msg.is_critical() {
            // Evict the newest non-critical message to make room.
            match q.iter().rposition(|m| !m.is_critical()) {
                Some(idx) => {
                    q.remove(idx);
                    q.push_back(msg);
                    drop(q);
                    self.notify.notify_one();
                    EnqueueResult::Enqueued
                }
                None => EnqueueResult::Overflowed,
            }
        } else {
            // Drop the oldest non-critical message; critical entries at
            // the head survive.
            match q.iter().position(|m| !m.is_critical()) {
                Some(idx) => {
                    q.remove(idx);
                }
                None => {
                    // Queue is all critical; the ordinary message loses.
                    return EnqueueResult::Enqueued;
                }
            }
            q.push_back(msg);
            drop(q);
            self.notify.notify_one();
            EnqueueResult::Enqueued
        }
    }

    pub async fn pop(&self) -> ServerMessage {
        loop {
            if let Some(msg) = self.lock().pop_front() {
                return msg;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<ServerMessage> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// One realtime client session.
pub struct PushConnection {
    pub id: String,
    pub connected_at: DateTime<Utc>,
    pub queue: OutboundQueue,
    last_ping: Mutex<DateTime<Utc>>,
    /// Set when the queue overflowed or the heartbeat lapsed; the socket
    /// task closes on observing it.
    closing: Notify,
}

impl PushConnection {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            connected_at: now,
            queue: OutboundQueue::new(OUTBOUND_QUEUE_CAP),
            last_ping: Mutex::new(now),
            closing: Notify::new(),
        }
    }

    pub fn record_ping(&self) {
        let mut last = self
            .last_ping
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Utc::now();
    }

    /// Whether the heartbeat has lapsed (two consecutive missed pings).
    pub fn heartbeat_expired(&self, now: DateTime<Utc>) -> bool {
        let last = *self
            .last_ping
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (now - last).num_seconds() >= HEARTBEAT_INTERVAL_SECS * HEARTBEAT_MISSES
    }

    pub fn request_close(&self) {
        self.closing.notify_waiters();
        self.closing.notify_one();
    }

    pub async fn closed(&self) {
        self.closing.notified().await;
    }
}

/// Table of live connections. Fan-out sends enqueue on every connection;
/// no connection state is shared beyond this table.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<Mutex<HashMap<String, Arc<PushConnection>>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<PushConnection>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self) -> Arc<PushConnection> {
        let conn = Arc::new(PushConnection::new(argus_common::id::next_id()));
        self.lock().insert(conn.id.clone(), conn.clone());
        tracing::info!(connection_id = %conn.id, "Push client connected");
        conn
    }

    pub fn remove(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            tracing::info!(connection_id = %id, "Push client disconnected");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Enqueue a message on every live connection. Connections whose
    /// queue overflows with critical traffic are told to close.
    pub fn broadcast(&self, msg: &ServerMessage) {
        let connections: Vec<Arc<PushConnection>> = self.lock().values().cloned().collect();
        for conn in connections {
            if conn.queue.push(msg.clone()) == EnqueueResult::Overflowed {
                tracing::warn!(
                    connection_id = %conn.id,
                    "Outbound queue overflowed, closing connection (backpressure)"
                );
                conn.request_close();
            }
        }
    }
}

/// Map a bus message to its push representation.
pub fn to_server_message(msg: BusMessage) -> Option<ServerMessage> {
    match msg {
        BusMessage::AlertFired(alert) => Some(ServerMessage::new(ServerBody::Alert {
            id: alert.id,
            severity: alert.severity,
            title: alert.title,
            summary: alert.summary,
            source: alert.source,
            investigation_id: alert.investigation_id,
        })),
        BusMessage::AlertStateChanged {
            alert_id,
            status,
            by,
        } => Some(ServerMessage::new(ServerBody::AlertStateChange {
            id: alert_id,
            status: status.to_string(),
            by,
        })),
        BusMessage::ActionRequested(req) => Some(ServerMessage::new(ServerBody::ActionRequest {
            id: req.id,
            tool: req.tool,
            description: req.description,
            command: req.command,
            risk_level: req.risk.to_string(),
            reversible: req.reversible,
            requires_password: req.requires_password,
        })),
        BusMessage::ActionCompleted(done) => Some(ServerMessage::new(ServerBody::ActionComplete {
            id: done.id,
            exit_code: done.exit_code,
            stdout: done.stdout,
            stderr: done.stderr,
            duration_ms: done.duration_ms,
        })),
        BusMessage::ReactDelta(msg) => Some(msg),
        BusMessage::BudgetUpdated(snapshot) => {
            Some(ServerMessage::new(ServerBody::BudgetUpdate(snapshot)))
        }
        BusMessage::SystemStatus(status) => {
            Some(ServerMessage::new(ServerBody::SystemStatus { status }))
        }
        BusMessage::TelemetryRaw(_) | BusMessage::EventClassified(_) => None,
    }
}

/// Spawn the bus→connections fan-out task. One subscription covers every
/// client-visible topic so cross-topic ordering is preserved per client.
pub fn spawn_fanout(bus: &EventBus, connections: ConnectionManager) -> tokio::task::JoinHandle<()> {
    let sub: Subscription = bus.subscribe(&Topic::CLIENT_VISIBLE, 4096);
    tokio::spawn(async move {
        loop {
            let msg = sub.recv().await;
            if let Some(server_msg) = to_server_message(msg) {
                connections.broadcast(&server_msg);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_common::types::Severity;

    fn delta(n: u64) -> ServerMessage {
        ServerMessage {
            id: n.to_string(),
            timestamp: Utc::now(),
            body: ServerBody::AssistantMessageDelta {
                run_id: "r".to_string(),
                content: format!("chunk {n}"),
            },
        }
    }

    fn critical(n: u64) -> ServerMessage {
        ServerMessage {
            id: n.to_string(),
            timestamp: Utc::now(),
            body: ServerBody::Alert {
                id: n.to_string(),
                severity: Severity::Urgent,
                title: "t".to_string(),
                summary: "s".to_string(),
                source: "host".to_string(),
                investigation_id: None,
            },
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = OutboundQueue::new(8);
        for n in 0..5 {
            assert_eq!(q.push(delta(n)), EnqueueResult::Enqueued);
        }
        for n in 0..5 {
            assert_eq!(q.try_pop().unwrap().id, n.to_string());
        }
    }

    #[test]
    fn overflow_drops_oldest_non_critical() {
        let q = OutboundQueue::new(3);
        q.push(critical(0));
        q.push(delta(1));
        q.push(delta(2));
        // Full. A new ordinary message drops the oldest non-critical (1).
        q.push(delta(3));
        let ids: Vec<String> = std::iter::from_fn(|| q.try_pop()).map(|m| m.id).collect();
        assert_eq!(ids, vec!["0", "2", "3"]);
    }

    #[test]
    fn critical_evicts_from_the_tail_of_non_critical() {
        let q = OutboundQueue::new(3);
        q.push(delta(0));
        q.push(delta(1));
        q.push(critical(2));
        // Full. A critical message evicts the newest non-critical (1).
        assert_eq!(q.push(critical(3)), EnqueueResult::Enqueued);
        let ids: Vec<String> = std::iter::from_fn(|| q.try_pop()).map(|m| m.id).collect();
        assert_eq!(ids, vec!["0", "2", "3"]);
    }

    #[test]
    fn all_critical_overflow_requests_close() {
        let q = OutboundQueue::new(2);
        q.push(critical(0));
        q.push(critical(1));
        assert_eq!(q.push(critical(2)), EnqueueResult::Overflowed);
        // An ordinary message is simply dropped in that state.
        assert_eq!(q.push(delta(3)), EnqueueResult::Enqueued);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn heartbeat_expiry_window() {
        let conn = PushConnection::new("c1".to_string());
        assert!(!conn.heartbeat_expired(Utc::now()));
        assert!(!conn.heartbeat_expired(Utc::now() + chrono::Duration::seconds(59)));
        assert!(conn.heartbeat_expired(Utc::now() + chrono::Duration::seconds(61)));
        conn.record_ping();
        assert!(!conn.heartbeat_expired(Utc::now() + chrono::Duration::seconds(59)));
    }

    #[test]
    fn broadcast_reaches_all_connections() {
        argus_common::id::init(1, 1);
        let manager = ConnectionManager::new();
        let a = manager.register();
        let b = manager.register();
        manager.broadcast(&delta(1));
        assert_eq!(a.queue.len(), 1);
        assert_eq!(b.queue.len(), 1);
        manager.remove(&a.id);
        manager.broadcast(&delta(2));
        assert_eq!(a.queue.len(), 1);
        assert_eq!(b.queue.len(), 2);
    }
}
