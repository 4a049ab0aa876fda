use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordinal severity assigned to events by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Notable,
    Urgent,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Notable => write!(f, "NOTABLE"),
            Severity::Urgent => write!(f, "URGENT"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "NOTABLE" => Ok(Severity::Notable),
            "URGENT" => Ok(Severity::Urgent),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The kind of telemetry an [`Event`] carries. Determines which
/// time-series table the payload lands in and which classifier policy
/// and dedup key apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Log,
    Metric,
    Span,
    Dependency,
    Process,
    SecurityFinding,
    SdkEvent,
    AlertDerived,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Log,
        EventKind::Metric,
        EventKind::Span,
        EventKind::Dependency,
        EventKind::Process,
        EventKind::SecurityFinding,
        EventKind::SdkEvent,
        EventKind::AlertDerived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Log => "log",
            EventKind::Metric => "metric",
            EventKind::Span => "span",
            EventKind::Dependency => "dependency",
            EventKind::Process => "process",
            EventKind::SecurityFinding => "security-finding",
            EventKind::SdkEvent => "sdk-event",
            EventKind::AlertDerived => "alert-derived",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(EventKind::Log),
            "metric" => Ok(EventKind::Metric),
            "span" => Ok(EventKind::Span),
            "dependency" => Ok(EventKind::Dependency),
            "process" => Ok(EventKind::Process),
            "security-finding" | "security_finding" => Ok(EventKind::SecurityFinding),
            "sdk-event" | "sdk_event" | "exception" | "event" => Ok(EventKind::SdkEvent),
            "alert-derived" => Ok(EventKind::AlertDerived),
            _ => Err(format!("unknown event kind: {s}")),
        }
    }
}

/// Kind-specific event body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    Log(LogPayload),
    Metric(MetricPayload),
    Span(SpanPayload),
    Dependency(DependencyPayload),
    Process(ProcessPayload),
    SecurityFinding(SecurityPayload),
    SdkEvent(SdkEventPayload),
    AlertDerived(AlertDerivedPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Log(_) => EventKind::Log,
            EventPayload::Metric(_) => EventKind::Metric,
            EventPayload::Span(_) => EventKind::Span,
            EventPayload::Dependency(_) => EventKind::Dependency,
            EventPayload::Process(_) => EventKind::Process,
            EventPayload::SecurityFinding(_) => EventKind::SecurityFinding,
            EventPayload::SdkEvent(_) => EventKind::SdkEvent,
            EventPayload::AlertDerived(_) => EventKind::AlertDerived,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPayload {
    pub file: String,
    #[serde(default)]
    pub line_offset: i64,
    pub level: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPayload {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanPayload {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    pub name: String,
    #[serde(default = "default_span_kind")]
    pub span_kind: String,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default = "default_status_ok")]
    pub status: String,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

fn default_span_kind() -> String {
    "internal".to_string()
}

fn default_status_ok() -> String {
    "ok".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyPayload {
    pub dep_type: String,
    pub target: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default = "default_status_ok")]
    pub status: String,
    #[serde(default)]
    pub status_code: Option<i32>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPayload {
    pub name: String,
    pub pid: i64,
    /// One of: started, crashed, oom_killed, restart_loop.
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPayload {
    /// Stable check identifier (e.g., "ssh_brute_force", "new_open_port").
    pub check: String,
    /// "pass" or "fail".
    pub status: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkEventPayload {
    /// SDK event type: log, exception, span, dependency, runtime_metric,
    /// deploy, event.
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDerivedPayload {
    pub alert_id: String,
    pub rule_id: String,
}

/// An immutable telemetry event. Created on ingest or collector tick,
/// persisted to the time-series store, published on the bus, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Host or service the event originates from.
    pub source: String,
    pub severity: Severity,
    #[serde(default)]
    pub message: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Alert lifecycle. Transitions are monotonic: active → acknowledged →
/// resolved; resolved is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Active => write!(f, "active"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AlertStatus::Active),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// An alert instance fired by a rule match on a classified event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub dedup_key: String,
    pub timestamp: DateTime<Utc>,
    pub status: AlertStatus,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub investigation_id: Option<String>,
}

/// Ordinal risk tag on tools and actions. Anything at or above
/// [`RiskLevel::Medium`] requires an approved action response before it
/// may execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    ReadOnly,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn requires_approval(&self) -> bool {
        *self >= RiskLevel::Medium
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::ReadOnly => write!(f, "READ_ONLY"),
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "READ_ONLY" => Ok(RiskLevel::ReadOnly),
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            _ => Err(format!("unknown risk level: {s}")),
        }
    }
}

/// Budget admission priority. Non-critical priorities are capped below
/// the window limit so a reserve remains for critical work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Routine,
    Elevated,
    Urgent,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Routine => write!(f, "routine"),
            Priority::Elevated => write!(f, "elevated"),
            Priority::Urgent => write!(f, "urgent"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Rich display hint attached to tool results for client rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayType {
    LogViewer,
    MetricsChart,
    ProcessTable,
    Table,
    Chart,
    CommandOutput,
    CodeBlock,
    JsonTree,
}

/// A proposed side-effecting action awaiting approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequestInfo {
    pub id: String,
    pub tool: String,
    pub description: String,
    pub command: Vec<String>,
    pub risk: RiskLevel,
    pub reversible: bool,
    pub requires_password: bool,
    /// ReAct run that initiated the action.
    pub run_id: String,
    pub pending_since: DateTime<Utc>,
}

/// Outcome of an executed (or refused) action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCompletionInfo {
    pub id: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Token counts from a single LLM turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Budget counters snapshot published on `budget.update` and returned by
/// `GET /budget`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub hourly_used: u64,
    pub hourly_limit: u64,
    pub hourly_pct: f64,
    pub daily_used: u64,
    pub daily_limit: u64,
    pub daily_pct: f64,
    pub total_tokens: u64,
    pub total_requests: u64,
}

/// Why a ReAct run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    FinalAnswer,
    BudgetExhausted,
    ToolErrorFatal,
    MaxSteps,
    Cancelled,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::FinalAnswer => write!(f, "final-answer"),
            TerminationReason::BudgetExhausted => write!(f, "budget-exhausted"),
            TerminationReason::ToolErrorFatal => write!(f, "tool-error-fatal"),
            TerminationReason::MaxSteps => write!(f, "max-steps"),
            TerminationReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_escalation() {
        assert!(Severity::Info < Severity::Notable);
        assert!(Severity::Notable < Severity::Urgent);
    }

    #[test]
    fn risk_approval_threshold() {
        assert!(!RiskLevel::ReadOnly.requires_approval());
        assert!(!RiskLevel::Low.requires_approval());
        assert!(RiskLevel::Medium.requires_approval());
        assert!(RiskLevel::High.requires_approval());
        assert!(RiskLevel::Critical.requires_approval());
    }

    #[test]
    fn event_kind_round_trips_through_str() {
        for kind in EventKind::ALL {
            let parsed: EventKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn payload_kind_matches_variant() {
        let payload = EventPayload::Metric(MetricPayload {
            name: "cpu_percent".into(),
            value: 97.0,
            labels: HashMap::new(),
        });
        assert_eq!(payload.kind(), EventKind::Metric);
    }
}
