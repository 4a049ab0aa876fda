//! Token budget accounting with rolling hourly/daily windows and
//! priority reserves.
//!
//! The manager is a single-writer actor: all reserve/settle traffic goes
//! through one serialized command queue, and [`BudgetHandle`] is the
//! cloneable front. An admission check reserves tokens atomically; on
//! completion the actual usage replaces the reservation. Refused requests
//! reserve nothing. Every reserve/settle publishes `budget.update`.

use argus_bus::{BusMessage, EventBus};
use argus_common::types::{BudgetSnapshot, Priority, TokenUsage};
use chrono::{Datelike, Timelike, Utc};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing;

/// Budget limits. Non-critical priorities are capped at a fraction of the
/// window so a reserve remains for more urgent work; `critical` may use
/// the full window.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub hourly_limit: u64,
    pub daily_limit: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            hourly_limit: 500_000,
            daily_limit: 5_000_000,
        }
    }
}

fn cap_fraction(priority: Priority) -> f64 {
    match priority {
        Priority::Routine => 0.6,
        Priority::Elevated => 0.8,
        Priority::Urgent => 0.9,
        Priority::Critical => 1.0,
    }
}

/// A successful admission. Hand it back to [`BudgetHandle::settle`] when
/// the reserved call completes.
#[derive(Debug)]
pub struct Reservation {
    pub id: u64,
    pub estimated_tokens: u64,
    pub priority: Priority,
}

#[derive(Debug)]
enum Command {
    Reserve {
        priority: Priority,
        estimated_tokens: u64,
        reply: oneshot::Sender<Option<Reservation>>,
    },
    Settle {
        reservation_id: u64,
        usage: TokenUsage,
    },
    Status {
        reply: oneshot::Sender<BudgetSnapshot>,
    },
}

#[derive(Default)]
struct Window {
    tokens: u64,
    reset_marker: i64,
}

struct BudgetActor {
    config: BudgetConfig,
    hourly: Window,
    daily: Window,
    outstanding: HashMap<u64, u64>,
    next_reservation: u64,
    total_tokens: u64,
    total_requests: u64,
    requests_by_priority: HashMap<Priority, u64>,
    bus: EventBus,
}

impl BudgetActor {
    fn maybe_reset(&mut self) {
        let now = Utc::now();
        let hour_marker = now.hour() as i64;
        if self.hourly.reset_marker != hour_marker {
            self.hourly.tokens = 0;
            self.hourly.reset_marker = hour_marker;
        }
        let day_marker = now.day() as i64;
        if self.daily.reset_marker != day_marker {
            self.daily.tokens = 0;
            self.daily.reset_marker = day_marker;
        }
    }

    fn reserve(&mut self, priority: Priority, estimated: u64) -> Option<Reservation> {
        self.maybe_reset();

        let hourly_cap = (self.config.hourly_limit as f64 * cap_fraction(priority)) as u64;
        let daily_cap = (self.config.daily_limit as f64 * cap_fraction(priority)) as u64;

        if self.hourly.tokens + estimated > hourly_cap
            || self.daily.tokens + estimated > daily_cap
        {
            tracing::debug!(
                %priority,
                estimated,
                hourly_used = self.hourly.tokens,
                hourly_cap,
                "Budget admission refused"
            );
            return None;
        }

        self.hourly.tokens += estimated;
        self.daily.tokens += estimated;
        self.total_requests += 1;
        *self.requests_by_priority.entry(priority).or_default() += 1;

        let id = self.next_reservation;
        self.next_reservation += 1;
        self.outstanding.insert(id, estimated);
        Some(Reservation {
            id,
            estimated_tokens: estimated,
            priority,
        })
    }

    fn settle(&mut self, reservation_id: u64, usage: TokenUsage) {
        self.maybe_reset();
        let estimated = self.outstanding.remove(&reservation_id).unwrap_or(0);
        let actual = usage.total();

        // Replace the estimate with actuals. Overshoot is accepted as-is;
        // the next admission pays for it.
        self.hourly.tokens = self.hourly.tokens.saturating_sub(estimated) + actual;
        self.daily.tokens = self.daily.tokens.saturating_sub(estimated) + actual;
        self.total_tokens += actual;

        tracing::debug!(
            reservation_id,
            estimated,
            actual,
            hourly_used = self.hourly.tokens,
            "Budget settled"
        );
    }

    fn snapshot(&mut self) -> BudgetSnapshot {
        self.maybe_reset();
        let pct = |used: u64, limit: u64| {
            if limit == 0 {
                0.0
            } else {
                (used as f64 / limit as f64 * 1000.0).round() / 10.0
            }
        };
        BudgetSnapshot {
            hourly_used: self.hourly.tokens,
            hourly_limit: self.config.hourly_limit,
            hourly_pct: pct(self.hourly.tokens, self.config.hourly_limit),
            daily_used: self.daily.tokens,
            daily_limit: self.config.daily_limit,
            daily_pct: pct(self.daily.tokens, self.config.daily_limit),
            total_tokens: self.total_tokens,
            total_requests: self.total_requests,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Reserve {
                    priority,
                    estimated_tokens,
                    reply,
                } => {
                    let result = self.reserve(priority, estimated_tokens);
                    let admitted = result.is_some();
                    let _ = reply.send(result);
                    if admitted {
                        self.publish_update();
                    }
                }
                Command::Settle {
                    reservation_id,
                    usage,
                } => {
                    self.settle(reservation_id, usage);
                    self.publish_update();
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
    }

    fn publish_update(&mut self) {
        let snapshot = self.snapshot();
        self.bus.publish(BusMessage::BudgetUpdated(snapshot));
    }
}

/// Cloneable front for the budget actor.
#[derive(Clone)]
pub struct BudgetHandle {
    tx: mpsc::Sender<Command>,
}

impl BudgetHandle {
    /// Spawn the single-writer actor and return its handle.
    pub fn spawn(config: BudgetConfig, bus: EventBus) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let now = Utc::now();
        let actor = BudgetActor {
            config,
            hourly: Window {
                tokens: 0,
                reset_marker: now.hour() as i64,
            },
            daily: Window {
                tokens: 0,
                reset_marker: now.day() as i64,
            },
            outstanding: HashMap::new(),
            next_reservation: 1,
            total_tokens: 0,
            total_requests: 0,
            requests_by_priority: HashMap::new(),
            bus,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Atomically reserve `estimated_tokens` at `priority`. Returns `None`
    /// when the admission is refused; refused requests reserve nothing.
    pub async fn reserve(&self, priority: Priority, estimated_tokens: u64) -> Option<Reservation> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Reserve {
                priority,
                estimated_tokens,
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Replace a reservation with actual usage.
    pub async fn settle(&self, reservation: Reservation, usage: TokenUsage) {
        let _ = self
            .tx
            .send(Command::Settle {
                reservation_id: reservation.id,
                usage,
            })
            .await;
    }

    pub async fn status(&self) -> BudgetSnapshot {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Status { reply }).await.is_err() {
            return BudgetSnapshot::default();
        }
        rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(hourly: u64, daily: u64) -> BudgetHandle {
        BudgetHandle::spawn(
            BudgetConfig {
                hourly_limit: hourly,
                daily_limit: daily,
            },
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn reserve_and_settle_replaces_estimate() {
        let budget = handle(1000, 10_000);
        let res = budget.reserve(Priority::Routine, 200).await.unwrap();
        assert_eq!(budget.status().await.hourly_used, 200);

        budget
            .settle(
                res,
                TokenUsage {
                    prompt_tokens: 50,
                    completion_tokens: 30,
                },
            )
            .await;
        assert_eq!(budget.status().await.hourly_used, 80);
        assert_eq!(budget.status().await.total_tokens, 80);
    }

    #[tokio::test]
    async fn routine_refused_at_cap_critical_admitted() {
        let budget = handle(1000, 100_000);

        // Routine cap is 60% of the hourly window.
        assert!(budget.reserve(Priority::Routine, 700).await.is_none());
        assert!(budget.reserve(Priority::Routine, 600).await.is_some());

        // Critical may use the full window.
        assert!(budget.reserve(Priority::Critical, 400).await.is_some());
        assert!(budget.reserve(Priority::Critical, 1).await.is_none());
    }

    #[tokio::test]
    async fn refused_request_reserves_nothing() {
        let budget = handle(1000, 100_000);
        let res = budget.reserve(Priority::Urgent, 900).await.unwrap();
        budget
            .settle(
                res,
                TokenUsage {
                    prompt_tokens: 900,
                    completion_tokens: 90,
                },
            )
            .await;
        let used_before = budget.status().await.hourly_used;
        assert_eq!(used_before, 990);

        assert!(budget.reserve(Priority::Routine, 100).await.is_none());
        assert_eq!(budget.status().await.hourly_used, 990);
    }

    #[tokio::test]
    async fn overshoot_accepted_next_admission_refused() {
        let budget = handle(1000, 100_000);
        let res = budget.reserve(Priority::Urgent, 500).await.unwrap();
        // Actuals exceed the estimate and even the window: accepted.
        budget
            .settle(
                res,
                TokenUsage {
                    prompt_tokens: 800,
                    completion_tokens: 400,
                },
            )
            .await;
        assert_eq!(budget.status().await.hourly_used, 1200);
        assert!(budget.reserve(Priority::Critical, 1).await.is_none());
    }

    #[tokio::test]
    async fn publishes_budget_updates() {
        let bus = EventBus::new();
        let sub = bus.subscribe(&[argus_bus::Topic::BudgetUpdate], 16);
        let budget = BudgetHandle::spawn(
            BudgetConfig {
                hourly_limit: 1000,
                daily_limit: 10_000,
            },
            bus,
        );

        let res = budget.reserve(Priority::Routine, 100).await.unwrap();
        match sub.recv().await {
            BusMessage::BudgetUpdated(snap) => assert_eq!(snap.hourly_used, 100),
            other => panic!("unexpected message: {other:?}"),
        }
        budget.settle(res, TokenUsage::default()).await;
        match sub.recv().await {
            BusMessage::BudgetUpdated(snap) => assert_eq!(snap.hourly_used, 0),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn daily_window_also_caps() {
        let budget = handle(1_000_000, 1000);
        assert!(budget.reserve(Priority::Routine, 700).await.is_none());
        assert!(budget.reserve(Priority::Critical, 1000).await.is_some());
    }
}
