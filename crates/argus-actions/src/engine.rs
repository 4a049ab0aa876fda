use crate::sandbox::{CommandOutcome, CommandSandbox};
use argus_bus::{BusMessage, EventBus};
use argus_common::error::CoreError;
use argus_common::protocol::{ServerBody, ServerMessage};
use argus_common::types::{ActionCompletionInfo, ActionRequestInfo, RiskLevel};
use argus_storage::CatalogStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing;

/// Default wait for a user approval before the request times out.
pub const APPROVAL_TIMEOUT_SECS: u64 = 120;

/// Execution guard applied to approved commands, same as tool dispatch.
const EXEC_TIMEOUT_SECS: u64 = 30;

/// An approval decision received over the push session.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub user: String,
    /// Fresh authorization marker, required for CRITICAL risk.
    pub authorization: Option<String>,
}

struct Inner {
    sandbox: CommandSandbox,
    catalog: Arc<CatalogStore>,
    bus: EventBus,
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
    approval_timeout: Duration,
}

/// Removes the pending entry when the waiting future is dropped
/// (cancellation) as well as on the normal paths.
struct PendingGuard {
    inner: Arc<Inner>,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.remove(&self.id);
    }
}

/// The action engine: risk classification, approval gating, guarded
/// execution, and the append-only audit trail. Exclusively owns pending
/// action requests keyed by id.
#[derive(Clone)]
pub struct ActionEngine {
    inner: Arc<Inner>,
}

impl ActionEngine {
    pub fn new(sandbox: CommandSandbox, catalog: Arc<CatalogStore>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                sandbox,
                catalog,
                bus,
                pending: Mutex::new(HashMap::new()),
                approval_timeout: Duration::from_secs(APPROVAL_TIMEOUT_SECS),
            }),
        }
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        // Only safe before the engine is shared.
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.approval_timeout = timeout;
        }
        self
    }

    /// Propose an action on behalf of a run. Read-only and low-risk
    /// commands execute immediately; anything at MEDIUM or above suspends
    /// until an approval arrives, the timeout fires, or the caller is
    /// cancelled.
    pub async fn propose(
        &self,
        run_id: &str,
        tool: &str,
        command: Vec<String>,
        description: String,
    ) -> Result<ActionCompletionInfo, CoreError> {
        let command_str = command.join(" ");
        let Some(risk) = self.inner.sandbox.validate(&command) else {
            self.audit(&description, &command_str, "blocked by safety filter", false, false)
                .await;
            return Err(CoreError::ActionRejected(
                "command blocked by safety filter".to_string(),
            ));
        };

        let action_id = argus_common::id::next_id();

        if !risk.requires_approval() {
            return Ok(self
                .execute(&action_id, &command, &description, run_id, false)
                .await);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.insert(action_id.clone(), tx);
        }
        let _guard = PendingGuard {
            inner: self.inner.clone(),
            id: action_id.clone(),
        };

        let request = ActionRequestInfo {
            id: action_id.clone(),
            tool: tool.to_string(),
            description: if description.is_empty() {
                format!("Execute: {command_str}")
            } else {
                description.clone()
            },
            command: command.clone(),
            risk,
            reversible: false,
            requires_password: risk >= RiskLevel::Critical,
            run_id: run_id.to_string(),
            pending_since: Utc::now(),
        };
        self.inner.bus.publish(BusMessage::ActionRequested(request));
        tracing::info!(
            action_id = %action_id,
            risk = %risk,
            command = %command_str,
            "Action pending approval"
        );

        let decision = match tokio::time::timeout(self.inner.approval_timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) | Err(_) => {
                self.audit(&description, &command_str, "approval timed out", false, false)
                    .await;
                return Err(CoreError::ActionTimedOut);
            }
        };

        if !decision.approved {
            self.audit(&description, &command_str, "rejected by user", false, false)
                .await;
            return Err(CoreError::ActionRejected(
                "action rejected by user".to_string(),
            ));
        }

        if risk >= RiskLevel::Critical && decision.authorization.as_deref().unwrap_or("").is_empty()
        {
            self.audit(
                &description,
                &command_str,
                "critical action without authorization marker",
                false,
                false,
            )
            .await;
            return Err(CoreError::ActionRejected(
                "critical actions require a fresh authorization".to_string(),
            ));
        }

        Ok(self
            .execute(&action_id, &command, &description, run_id, true)
            .await)
    }

    async fn execute(
        &self,
        action_id: &str,
        command: &[String],
        description: &str,
        run_id: &str,
        user_approved: bool,
    ) -> ActionCompletionInfo {
        self.inner
            .bus
            .publish(BusMessage::ReactDelta(ServerMessage::new(
                ServerBody::ActionExecuting {
                    id: action_id.to_string(),
                    command: command.to_vec(),
                },
            )));

        let outcome = self
            .inner
            .sandbox
            .execute(command, Duration::from_secs(EXEC_TIMEOUT_SECS))
            .await;

        let command_str = command.join(" ");
        let result_snippet = if outcome.exit_code == 0 {
            truncate(&outcome.stdout, 500)
        } else {
            truncate(&outcome.stderr, 500)
        };
        self.audit_with_run(
            description,
            &command_str,
            &result_snippet,
            outcome.exit_code == 0,
            user_approved,
            run_id,
        )
        .await;

        let completion = completion_info(action_id, &outcome);
        self.inner
            .bus
            .publish(BusMessage::ActionCompleted(completion.clone()));
        completion
    }

    /// Correlate an approval response with its pending request. Returns
    /// false when no such request is pending (late or unknown id).
    pub fn handle_response(&self, action_id: &str, decision: ApprovalDecision) -> bool {
        let tx = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.remove(action_id)
        };
        match tx {
            Some(tx) => tx.send(decision).is_ok(),
            None => {
                tracing::warn!(action_id = %action_id, "Action response for unknown action");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn audit(
        &self,
        action: &str,
        command: &str,
        result: &str,
        success: bool,
        user_approved: bool,
    ) {
        self.audit_with_run(action, command, result, success, user_approved, "")
            .await;
    }

    async fn audit_with_run(
        &self,
        action: &str,
        command: &str,
        result: &str,
        success: bool,
        user_approved: bool,
        run_id: &str,
    ) {
        if let Err(err) = self
            .inner
            .catalog
            .append_audit(action, command, result, success, user_approved, run_id)
            .await
        {
            tracing::error!(error = %err, "Failed to append audit entry");
        }
    }
}

fn completion_info(action_id: &str, outcome: &CommandOutcome) -> ActionCompletionInfo {
    ActionCompletionInfo {
        id: action_id.to_string(),
        exit_code: outcome.exit_code,
        stdout: truncate(&outcome.stdout, 1000),
        stderr: truncate(&outcome.stderr, 1000),
        duration_ms: outcome.duration_ms,
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
