//! Persistence layer: the time-series store and the catalog store.
//!
//! Telemetry lives in daily time-partitioned SQLite databases managed by
//! [`partition::PartitionManager`] with WAL mode for concurrent reads; the
//! engine serializes writes per partition and is the sole source of truth
//! for historical tool queries. Reads on the same engine observe prior
//! writes (single connection per partition).
//!
//! Catalog records (rules, alerts, investigations, audit, configs) live in
//! a separate SeaORM-managed database, see [`store::CatalogStore`].

pub mod engine;
pub mod entities;
pub mod error;
pub mod partition;
pub mod store;

#[cfg(test)]
mod tests;

use argus_common::types::{Event, EventPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use error::{Result, StorageError};
pub use store::{
    AlertFilter, AlertRow, AlertRuleRow, AlertRuleUpdate, AuditRow, CatalogStore,
    InvestigationRow, SystemConfigRow,
};

/// The seven logical telemetry tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    SystemMetrics,
    LogIndex,
    SdkEvents,
    Spans,
    DependencyCalls,
    SdkMetrics,
    DeployEvents,
}

impl TableKind {
    pub const ALL: [TableKind; 7] = [
        TableKind::SystemMetrics,
        TableKind::LogIndex,
        TableKind::SdkEvents,
        TableKind::Spans,
        TableKind::DependencyCalls,
        TableKind::SdkMetrics,
        TableKind::DeployEvents,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            TableKind::SystemMetrics => "system_metrics",
            TableKind::LogIndex => "log_index",
            TableKind::SdkEvents => "sdk_events",
            TableKind::Spans => "spans",
            TableKind::DependencyCalls => "dependency_calls",
            TableKind::SdkMetrics => "sdk_metrics",
            TableKind::DeployEvents => "deploy_events",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRow {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub name: String,
    pub value: f64,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRow {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub file: String,
    pub line_offset: i64,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkEventRow {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub event_type: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRow {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub span_kind: String,
    pub duration_ms: Option<f64>,
    pub status: String,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRow {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub dep_type: String,
    pub target: String,
    pub operation: String,
    pub duration_ms: Option<f64>,
    pub status: String,
    pub status_code: Option<i32>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRow {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub version: String,
    pub git_sha: String,
    pub environment: String,
    pub previous_version: String,
}

/// One telemetry row, tagged by destination table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryRow {
    Metric(MetricRow),
    Log(LogRow),
    SdkEvent(SdkEventRow),
    Span(SpanRow),
    Dependency(DependencyRow),
    SdkMetric(MetricRow),
    Deploy(DeployRow),
}

impl TelemetryRow {
    pub fn table(&self) -> TableKind {
        match self {
            TelemetryRow::Metric(_) => TableKind::SystemMetrics,
            TelemetryRow::Log(_) => TableKind::LogIndex,
            TelemetryRow::SdkEvent(_) => TableKind::SdkEvents,
            TelemetryRow::Span(_) => TableKind::Spans,
            TelemetryRow::Dependency(_) => TableKind::DependencyCalls,
            TelemetryRow::SdkMetric(_) => TableKind::SdkMetrics,
            TelemetryRow::Deploy(_) => TableKind::DeployEvents,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TelemetryRow::Metric(r) | TelemetryRow::SdkMetric(r) => r.timestamp,
            TelemetryRow::Log(r) => r.timestamp,
            TelemetryRow::SdkEvent(r) => r.timestamp,
            TelemetryRow::Span(r) => r.timestamp,
            TelemetryRow::Dependency(r) => r.timestamp,
            TelemetryRow::Deploy(r) => r.timestamp,
        }
    }

    /// Map an accepted event to its time-series row. Events whose kind has
    /// no telemetry table (alert-derived) return `None`.
    pub fn from_event(event: &Event) -> Option<TelemetryRow> {
        let ts = event.timestamp;
        let service = event.source.clone();
        match &event.payload {
            EventPayload::Metric(m) => Some(TelemetryRow::Metric(MetricRow {
                timestamp: ts,
                service,
                name: m.name.clone(),
                value: m.value,
                labels: m.labels.clone(),
            })),
            EventPayload::Log(l) => Some(TelemetryRow::Log(LogRow {
                timestamp: ts,
                service,
                file: l.file.clone(),
                line_offset: l.line_offset,
                level: l.level.clone(),
                message: l.text.clone(),
            })),
            EventPayload::Span(s) => Some(TelemetryRow::Span(SpanRow {
                timestamp: ts,
                service,
                trace_id: s.trace_id.clone(),
                span_id: s.span_id.clone(),
                parent_span_id: s.parent_span_id.clone(),
                name: s.name.clone(),
                span_kind: s.span_kind.clone(),
                duration_ms: s.duration_ms,
                status: s.status.clone(),
                error_type: s.error_type.clone(),
                error_message: s.error_message.clone(),
            })),
            EventPayload::Dependency(d) => Some(TelemetryRow::Dependency(DependencyRow {
                timestamp: ts,
                service,
                dep_type: d.dep_type.clone(),
                target: d.target.clone(),
                operation: d.operation.clone(),
                duration_ms: d.duration_ms,
                status: d.status.clone(),
                status_code: d.status_code,
                error_message: d.error_message.clone(),
            })),
            EventPayload::Process(p) => Some(TelemetryRow::SdkEvent(SdkEventRow {
                timestamp: ts,
                service,
                event_type: "process".to_string(),
                data: serde_json::json!({
                    "name": p.name,
                    "pid": p.pid,
                    "state": p.state,
                }),
            })),
            EventPayload::SecurityFinding(s) => Some(TelemetryRow::SdkEvent(SdkEventRow {
                timestamp: ts,
                service,
                event_type: "security_finding".to_string(),
                data: serde_json::json!({
                    "check": s.check,
                    "status": s.status,
                    "detail": s.detail,
                }),
            })),
            EventPayload::SdkEvent(e) => match e.event_type.as_str() {
                "runtime_metric" => {
                    let name = e.data.get("metric_name").and_then(|v| v.as_str())?;
                    let value = e.data.get("value").and_then(|v| v.as_f64())?;
                    Some(TelemetryRow::SdkMetric(MetricRow {
                        timestamp: ts,
                        service,
                        name: name.to_string(),
                        value,
                        labels: HashMap::new(),
                    }))
                }
                "deploy" => {
                    let get = |key: &str| {
                        e.data
                            .get(key)
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string()
                    };
                    Some(TelemetryRow::Deploy(DeployRow {
                        timestamp: ts,
                        service,
                        version: get("version"),
                        git_sha: get("git_sha"),
                        environment: get("environment"),
                        previous_version: get("previous_version"),
                    }))
                }
                _ => Some(TelemetryRow::SdkEvent(SdkEventRow {
                    timestamp: ts,
                    service,
                    event_type: e.event_type.clone(),
                    data: e.data.clone(),
                })),
            },
            EventPayload::AlertDerived(_) => None,
        }
    }
}

/// Filtered, window-bounded query over one telemetry table.
#[derive(Debug, Clone)]
pub struct TelemetryQuery {
    pub kind: TableKind,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Exact service match.
    pub service: Option<String>,
    /// Metric/span/check name exact match.
    pub name: Option<String>,
    /// Log level / span status exact match.
    pub level: Option<String>,
    /// Substring match on the message/data column.
    pub text_contains: Option<String>,
    pub trace_id: Option<String>,
    pub order_desc: bool,
    pub limit: usize,
}

impl TelemetryQuery {
    pub fn new(kind: TableKind, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            kind,
            from,
            to,
            service: None,
            name: None,
            level: None,
            text_contains: None,
            trace_id: None,
            order_desc: false,
            limit: 500,
        }
    }
}

/// Bounded query result. `truncated` reports whether the limit cut rows.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub rows: Vec<TelemetryRow>,
    pub truncated: bool,
}

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Avg,
    Min,
    Max,
    Count,
    P50,
    P95,
    P99,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Count => "count",
            Aggregate::P50 => "p50",
            Aggregate::P95 => "p95",
            Aggregate::P99 => "p99",
        }
    }
}

/// Time-bucketed aggregation over a window.
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    pub kind: TableKind,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub bucket_secs: u64,
    pub group_by_service: bool,
    pub service: Option<String>,
    pub name: Option<String>,
    pub aggregates: Vec<Aggregate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateRow {
    pub bucket: DateTime<Utc>,
    pub group: Option<String>,
    pub values: HashMap<&'static str, f64>,
}

/// Append/query interface over the seven telemetry tables.
///
/// Implementations must be `Send + Sync`; the engine is shared between the
/// ingest writer, the REST API, and tool handlers.
pub trait TimeSeriesStore: Send + Sync {
    /// Batched insert; atomic per batch per partition. Returns after the
    /// rows are durably handed to SQLite.
    fn append(&self, rows: &[TelemetryRow]) -> Result<()>;

    /// Window-bounded query; truncation is reported, never silent.
    fn query(&self, query: &TelemetryQuery) -> Result<QueryResult>;

    /// Histogram/percentile aggregation over a window.
    fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<AggregateRow>>;

    /// Removes partitions older than `retention_days`. Returns the number
    /// of partitions removed.
    fn purge(&self, retention_days: u32) -> Result<u32>;

    /// Depth of the pending write queue, used for ingest backpressure.
    fn write_queue_depth(&self) -> usize {
        0
    }
}
