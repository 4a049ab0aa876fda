use crate::memory::ConversationMemory;
use crate::prompt;
use crate::react::{ReactLoop, RunParams};
use argus_bus::{BusMessage, EventBus};
use argus_budget::BudgetHandle;
use argus_common::protocol::{ServerBody, ServerMessage};
use argus_common::types::{Alert, TerminationReason};
use argus_storage::{CatalogStore, InvestigationRow};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing;

const MAX_CONCURRENT: usize = 2;
const QUEUE_MAX_SIZE: usize = 20;

/// Pre-flight token estimate for one investigation.
const INVESTIGATION_ESTIMATE_TOKENS: u64 = 4000;

/// Result of attempting to enqueue an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestigationStatus {
    Queued,
    DroppedQueueFull,
    DroppedBudget,
}

/// Carries all context needed to run an investigation.
#[derive(Debug, Clone)]
pub struct InvestigationRequest {
    pub alert: Alert,
}

struct Shared {
    react: Arc<ReactLoop>,
    catalog: Arc<CatalogStore>,
    bus: EventBus,
    budget: BudgetHandle,
    /// alert_id -> cancel signal for the in-flight run.
    running: Mutex<HashMap<String, watch::Sender<bool>>>,
}

/// Orchestrates auto-investigations triggered by urgent alerts.
///
/// Budget-gated at enqueue and again at dequeue, dispatched on a small
/// worker pool with a bounded queue so alert storms cannot pile up
/// unbounded LLM work.
#[derive(Clone)]
pub struct Investigator {
    tx: mpsc::Sender<InvestigationRequest>,
    shared: Arc<Shared>,
}

impl Investigator {
    pub fn spawn(
        react: Arc<ReactLoop>,
        catalog: Arc<CatalogStore>,
        bus: EventBus,
        budget: BudgetHandle,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<InvestigationRequest>(QUEUE_MAX_SIZE);
        let shared = Arc::new(Shared {
            react,
            catalog,
            bus,
            budget,
            running: Mutex::new(HashMap::new()),
        });
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..MAX_CONCURRENT {
            let shared = shared.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                tracing::debug!(worker_id, "Investigation worker started");
                loop {
                    let request = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(request) = request else { break };
                    if let Err(err) = run_investigation(&shared, request).await {
                        tracing::error!(worker_id, error = %err, "Investigation failed");
                    }
                }
                tracing::debug!(worker_id, "Investigation worker stopped");
            });
        }
        Self { tx, shared }
    }

    /// Non-blocking enqueue with a pre-flight budget check.
    pub async fn enqueue(&self, request: InvestigationRequest) -> InvestigationStatus {
        let status = self.shared.budget.status().await;
        let urgent_cap = (status.hourly_limit as f64 * 0.9) as u64;
        if status.hourly_used + INVESTIGATION_ESTIMATE_TOKENS > urgent_cap {
            tracing::warn!(
                alert_id = %request.alert.id,
                "Budget exceeded, dropping investigation"
            );
            return InvestigationStatus::DroppedBudget;
        }

        match self.tx.try_send(request) {
            Ok(()) => InvestigationStatus::Queued,
            Err(mpsc::error::TrySendError::Full(request)) => {
                tracing::warn!(
                    alert_id = %request.alert.id,
                    queue_max = QUEUE_MAX_SIZE,
                    "Investigation queue full, dropping request"
                );
                InvestigationStatus::DroppedQueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => InvestigationStatus::DroppedQueueFull,
        }
    }

    /// Cancel the in-flight investigation for an alert, if any. Called
    /// when the alert resolves before the run completes.
    pub fn cancel_for_alert(&self, alert_id: &str) -> bool {
        let running = self
            .shared
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match running.get(alert_id) {
            Some(cancel) => cancel.send(true).is_ok(),
            None => false,
        }
    }
}

async fn run_investigation(shared: &Shared, request: InvestigationRequest) -> anyhow::Result<()> {
    let alert: Alert = request.alert;

    // Authoritative budget check at dequeue time; the queue wait may have
    // outlived the budget headroom.
    let status = shared.budget.status().await;
    let urgent_cap = (status.hourly_limit as f64 * 0.9) as u64;
    if status.hourly_used + INVESTIGATION_ESTIMATE_TOKENS > urgent_cap {
        tracing::warn!(alert_id = %alert.id, "Budget exceeded at dequeue, skipping investigation");
        return Ok(());
    }

    let investigation_id = argus_common::id::next_id();
    shared
        .catalog
        .insert_investigation(&InvestigationRow {
            id: investigation_id.clone(),
            alert_id: alert.id.clone(),
            trigger: alert.title.clone(),
            status: "running".to_string(),
            summary: String::new(),
            tokens_used: 0,
            started_at: Utc::now(),
            completed_at: None,
        })
        .await?;
    shared
        .catalog
        .set_alert_investigation(&alert.id, &investigation_id)
        .await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    {
        let mut running = shared
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running.insert(alert.id.clone(), cancel_tx);
    }

    shared
        .bus
        .publish(BusMessage::ReactDelta(ServerMessage::new(
            ServerBody::InvestigationStart {
                investigation_id: investigation_id.clone(),
                trigger: alert.title.clone(),
                severity: alert.severity,
            },
        )));

    let mut memory = ConversationMemory::with_conversation_id(
        prompt::INVESTIGATION_SYSTEM_PROMPT,
        investigation_id.clone(),
    );
    let run_id = argus_common::id::next_id();
    let result = shared
        .react
        .run(
            &mut memory,
            &prompt::investigation_prompt(&alert),
            RunParams::investigation(run_id, investigation_id.clone()),
            cancel_rx,
        )
        .await;

    {
        let mut running = shared
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running.remove(&alert.id);
    }

    let status = match result.termination {
        TerminationReason::FinalAnswer | TerminationReason::MaxSteps => "completed",
        TerminationReason::Cancelled => "cancelled",
        TerminationReason::BudgetExhausted | TerminationReason::ToolErrorFatal => "failed",
    };
    let summary = if result.content.is_empty() {
        format!("Investigation ended: {}", result.termination)
    } else {
        result.content.clone()
    };
    shared
        .catalog
        .complete_investigation(
            &investigation_id,
            status,
            &summary,
            result.usage.total() as i64,
        )
        .await?;

    shared
        .bus
        .publish(BusMessage::ReactDelta(ServerMessage::new(
            ServerBody::InvestigationEnd {
                investigation_id,
                summary,
                tokens_used: result.usage.total(),
            },
        )));
    Ok(())
}
