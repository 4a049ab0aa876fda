//! Wire protocol for the realtime push session.
//!
//! Both directions share the envelope `{type, id, timestamp, data}`. The
//! message bodies are adjacently-tagged discriminated unions, so decoding
//! fails closed on unknown `type` values.

use crate::types::{BudgetSnapshot, DisplayType, Severity, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A server→client push message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: ServerBody,
}

impl ServerMessage {
    pub fn new(body: ServerBody) -> Self {
        Self {
            id: crate::id::next_id(),
            timestamp: Utc::now(),
            body,
        }
    }

    /// Critical messages survive queue overflow by evicting non-critical
    /// messages instead of being dropped themselves.
    pub fn is_critical(&self) -> bool {
        matches!(
            self.body,
            ServerBody::Alert { .. }
                | ServerBody::ActionRequest { .. }
                | ServerBody::ActionComplete { .. }
                | ServerBody::Error { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerBody {
    Connected {
        message: String,
    },
    SystemStatus {
        #[serde(default)]
        status: serde_json::Value,
    },
    ThinkingStart {
        run_id: String,
    },
    ThinkingEnd {
        run_id: String,
    },
    AssistantMessageStart {
        run_id: String,
        conversation_id: String,
    },
    AssistantMessageDelta {
        run_id: String,
        content: String,
    },
    AssistantMessageEnd {
        run_id: String,
    },
    ToolCall {
        run_id: String,
        call_id: String,
        tool: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        run_id: String,
        call_id: String,
        tool: String,
        display: DisplayType,
        is_error: bool,
        result: serde_json::Value,
    },
    ActionRequest {
        id: String,
        tool: String,
        description: String,
        command: Vec<String>,
        risk_level: String,
        reversible: bool,
        requires_password: bool,
    },
    ActionExecuting {
        id: String,
        command: Vec<String>,
    },
    ActionComplete {
        id: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
        duration_ms: u64,
    },
    Alert {
        id: String,
        severity: Severity,
        title: String,
        summary: String,
        source: String,
        investigation_id: Option<String>,
    },
    AlertStateChange {
        id: String,
        status: String,
        by: String,
    },
    BudgetUpdate(BudgetSnapshot),
    InvestigationStart {
        investigation_id: String,
        trigger: String,
        severity: Severity,
    },
    InvestigationUpdate {
        investigation_id: String,
        content: String,
    },
    InvestigationEnd {
        investigation_id: String,
        summary: String,
        tokens_used: u64,
    },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    Pong,
}

/// A client→server message received over the push session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub body: ClientBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientBody {
    UserMessage {
        content: String,
    },
    ActionResponse {
        action_id: String,
        approved: bool,
        #[serde(default)]
        user: String,
        /// Fresh authorization marker required for CRITICAL-risk actions.
        #[serde(default)]
        authorization: Option<String>,
    },
    Cancel {
        run_id: String,
    },
    Ping,
}

/// A completed run summary, used when persisting investigations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub conversation_id: String,
    pub content: String,
    pub usage: TokenUsage,
    pub steps: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_envelope_shape() {
        let msg = ServerMessage {
            id: "1".into(),
            timestamp: Utc::now(),
            body: ServerBody::AssistantMessageDelta {
                run_id: "r1".into(),
                content: "hi".into(),
            },
        };
        let v: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "assistant_message_delta");
        assert_eq!(v["data"]["content"], "hi");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn client_message_parses_ping_without_data() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg.body, ClientBody::Ping));
    }

    #[test]
    fn client_message_rejects_unknown_type() {
        let res = serde_json::from_str::<ClientMessage>(r#"{"type":"evil","data":{}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn action_response_defaults() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"action_response","data":{"action_id":"a1","approved":true}}"#,
        )
        .unwrap();
        match msg.body {
            ClientBody::ActionResponse {
                action_id,
                approved,
                user,
                authorization,
            } => {
                assert_eq!(action_id, "a1");
                assert!(approved);
                assert!(user.is_empty());
                assert!(authorization.is_none());
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn critical_classification() {
        let alert = ServerMessage::new(ServerBody::Alert {
            id: "a".into(),
            severity: Severity::Urgent,
            title: "t".into(),
            summary: "s".into(),
            source: "host".into(),
            investigation_id: None,
        });
        assert!(alert.is_critical());

        let delta = ServerMessage::new(ServerBody::AssistantMessageDelta {
            run_id: "r".into(),
            content: "x".into(),
        });
        assert!(!delta.is_critical());
    }
}
