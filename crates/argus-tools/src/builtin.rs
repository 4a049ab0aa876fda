//! Builtin read-only tools over the time-series store and the catalog.

use crate::{
    ParamSpec, Tool, ToolContext, ToolError, ToolOutput, ToolResult, ToolSpec,
};
use argus_common::types::{DisplayType, RiskLevel};
use argus_storage::{
    CatalogStore, QueryResult, TableKind, TelemetryQuery, TelemetryRow, TimeSeriesStore,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Store queries answer within this deadline or fail the tool call.
const STORE_DEADLINE_SECS: u64 = 5;

const TIME_RANGES: [&str; 7] = ["5m", "15m", "30m", "1h", "6h", "24h", "7d"];

fn parse_time_range(range: &str) -> Option<Duration> {
    match range {
        "5m" => Some(Duration::minutes(5)),
        "15m" => Some(Duration::minutes(15)),
        "30m" => Some(Duration::minutes(30)),
        "1h" => Some(Duration::hours(1)),
        "6h" => Some(Duration::hours(6)),
        "24h" => Some(Duration::hours(24)),
        "7d" => Some(Duration::days(7)),
        _ => None,
    }
}

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn arg_range(args: &Value) -> Result<Duration, ToolError> {
    let range = arg_str(args, "time_range").unwrap_or_else(|| "1h".to_string());
    parse_time_range(&range).ok_or_else(|| {
        ToolError::invalid_args(format!(
            "invalid time_range, use one of: {}",
            TIME_RANGES.join(", ")
        ))
    })
}

fn arg_limit(args: &Value, default: usize) -> usize {
    args.get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

/// Run a blocking store query off the async runtime with the hard query
/// deadline applied.
async fn run_query(
    store: Arc<dyn TimeSeriesStore>,
    query: TelemetryQuery,
) -> Result<QueryResult, ToolError> {
    let fut = tokio::task::spawn_blocking(move || store.query(&query));
    match tokio::time::timeout(std::time::Duration::from_secs(STORE_DEADLINE_SECS), fut).await {
        Ok(Ok(Ok(result))) => Ok(result),
        Ok(Ok(Err(err))) => Err(ToolError::new("store_error", err.to_string())),
        Ok(Err(_)) => Err(ToolError::new("store_error", "query task failed")),
        Err(_) => Err(ToolError::new(
            "store_timeout",
            format!("store query exceeded {STORE_DEADLINE_SECS}s deadline"),
        )),
    }
}

fn rows_payload(result: &QueryResult) -> Value {
    json!({
        "rows": result.rows,
        "count": result.rows.len(),
        "truncated": result.truncated,
    })
}

// ---- query_metrics ----

pub struct QueryMetricsTool {
    store: Arc<dyn TimeSeriesStore>,
    spec: ToolSpec,
}

impl QueryMetricsTool {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            spec: ToolSpec::new(
                "query_metrics",
                "Query historical system metrics (CPU, memory, disk, load) over a time range, \
                 with a min/max/avg summary.",
                vec![
                    ParamSpec::string("metric", "Metric name, e.g. cpu_percent, memory_percent")
                        .required(),
                    ParamSpec::string("service", "Restrict to one host or service"),
                    ParamSpec::string_enum("time_range", "Look-back window", &TIME_RANGES),
                ],
                RiskLevel::ReadOnly,
                DisplayType::MetricsChart,
            ),
        }
    }
}

#[async_trait]
impl Tool for QueryMetricsTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        let range = arg_range(&args)?;
        let now = Utc::now();
        let mut query = TelemetryQuery::new(TableKind::SystemMetrics, now - range, now);
        query.name = arg_str(&args, "metric");
        query.service = arg_str(&args, "service");
        let result = run_query(self.store.clone(), query).await?;

        let values: Vec<f64> = result
            .rows
            .iter()
            .filter_map(|row| match row {
                TelemetryRow::Metric(m) => Some(m.value),
                _ => None,
            })
            .collect();
        let summary = if values.is_empty() {
            json!(null)
        } else {
            let sum: f64 = values.iter().sum();
            json!({
                "count": values.len(),
                "min": values.iter().cloned().fold(f64::INFINITY, f64::min),
                "max": values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                "avg": sum / values.len() as f64,
            })
        };

        Ok(ToolOutput {
            display: self.spec.display,
            payload: json!({
                "rows": result.rows,
                "truncated": result.truncated,
                "summary": summary,
            }),
        })
    }
}

// ---- search_logs ----

pub struct SearchLogsTool {
    store: Arc<dyn TimeSeriesStore>,
    spec: ToolSpec,
}

impl SearchLogsTool {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            spec: ToolSpec::new(
                "search_logs",
                "Search the log index by substring and severity over a time range.",
                vec![
                    ParamSpec::string("query", "Substring to match in log messages"),
                    ParamSpec::string("severity", "Exact log level, e.g. error"),
                    ParamSpec::string("service", "Restrict to one host or service"),
                    ParamSpec::string_enum("time_range", "Look-back window", &TIME_RANGES),
                    ParamSpec::integer("limit", "Maximum rows to return").range(1, 500),
                ],
                RiskLevel::ReadOnly,
                DisplayType::LogViewer,
            ),
        }
    }
}

#[async_trait]
impl Tool for SearchLogsTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        let range = arg_range(&args)?;
        let now = Utc::now();
        let mut query = TelemetryQuery::new(TableKind::LogIndex, now - range, now);
        query.text_contains = arg_str(&args, "query");
        query.level = arg_str(&args, "severity");
        query.service = arg_str(&args, "service");
        query.limit = arg_limit(&args, 100);
        query.order_desc = true;
        let result = run_query(self.store.clone(), query).await?;
        Ok(ToolOutput {
            display: self.spec.display,
            payload: rows_payload(&result),
        })
    }
}

// ---- get_sdk_events ----

pub struct GetSdkEventsTool {
    store: Arc<dyn TimeSeriesStore>,
    spec: ToolSpec,
}

impl GetSdkEventsTool {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            spec: ToolSpec::new(
                "get_sdk_events",
                "Fetch SDK telemetry events (exceptions, custom events) for a service.",
                vec![
                    ParamSpec::string("service", "Service name"),
                    ParamSpec::string("event_type", "Event type, e.g. exception"),
                    ParamSpec::string_enum("time_range", "Look-back window", &TIME_RANGES),
                    ParamSpec::integer("limit", "Maximum rows to return").range(1, 500),
                ],
                RiskLevel::ReadOnly,
                DisplayType::Table,
            ),
        }
    }
}

#[async_trait]
impl Tool for GetSdkEventsTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        let range = arg_range(&args)?;
        let now = Utc::now();
        let mut query = TelemetryQuery::new(TableKind::SdkEvents, now - range, now);
        query.service = arg_str(&args, "service");
        query.name = arg_str(&args, "event_type");
        query.limit = arg_limit(&args, 100);
        query.order_desc = true;
        let result = run_query(self.store.clone(), query).await?;
        Ok(ToolOutput {
            display: self.spec.display,
            payload: rows_payload(&result),
        })
    }
}

// ---- get_traces ----

pub struct GetTracesTool {
    store: Arc<dyn TimeSeriesStore>,
    spec: ToolSpec,
}

impl GetTracesTool {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            spec: ToolSpec::new(
                "get_traces",
                "Fetch spans, optionally for a single trace id or only errors.",
                vec![
                    ParamSpec::string("trace_id", "Exact trace id"),
                    ParamSpec::string("service", "Service name"),
                    ParamSpec::string_enum("status", "Span status filter", &["ok", "error"]),
                    ParamSpec::string_enum("time_range", "Look-back window", &TIME_RANGES),
                    ParamSpec::integer("limit", "Maximum rows to return").range(1, 500),
                ],
                RiskLevel::ReadOnly,
                DisplayType::Table,
            ),
        }
    }
}

#[async_trait]
impl Tool for GetTracesTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        let range = arg_range(&args)?;
        let now = Utc::now();
        let mut query = TelemetryQuery::new(TableKind::Spans, now - range, now);
        query.trace_id = arg_str(&args, "trace_id");
        query.service = arg_str(&args, "service");
        query.level = arg_str(&args, "status");
        query.limit = arg_limit(&args, 100);
        query.order_desc = true;
        let result = run_query(self.store.clone(), query).await?;
        Ok(ToolOutput {
            display: self.spec.display,
            payload: rows_payload(&result),
        })
    }
}

// ---- get_dependency_calls ----

pub struct GetDependencyCallsTool {
    store: Arc<dyn TimeSeriesStore>,
    spec: ToolSpec,
}

impl GetDependencyCallsTool {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            spec: ToolSpec::new(
                "get_dependency_calls",
                "Fetch outbound dependency calls (databases, HTTP, queues) for a service.",
                vec![
                    ParamSpec::string("service", "Calling service"),
                    ParamSpec::string("target", "Dependency target, e.g. postgres://orders"),
                    ParamSpec::string_enum("time_range", "Look-back window", &TIME_RANGES),
                    ParamSpec::integer("limit", "Maximum rows to return").range(1, 500),
                ],
                RiskLevel::ReadOnly,
                DisplayType::Table,
            ),
        }
    }
}

#[async_trait]
impl Tool for GetDependencyCallsTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        let range = arg_range(&args)?;
        let now = Utc::now();
        let mut query = TelemetryQuery::new(TableKind::DependencyCalls, now - range, now);
        query.service = arg_str(&args, "service");
        query.name = arg_str(&args, "target");
        query.limit = arg_limit(&args, 100);
        query.order_desc = true;
        let result = run_query(self.store.clone(), query).await?;
        Ok(ToolOutput {
            display: self.spec.display,
            payload: rows_payload(&result),
        })
    }
}

// ---- get_deploys ----

pub struct GetDeploysTool {
    store: Arc<dyn TimeSeriesStore>,
    spec: ToolSpec,
}

impl GetDeploysTool {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            spec: ToolSpec::new(
                "get_deploys",
                "List recent deploy events, useful for correlating regressions.",
                vec![
                    ParamSpec::string("service", "Service name"),
                    ParamSpec::string_enum("time_range", "Look-back window", &TIME_RANGES),
                    ParamSpec::integer("limit", "Maximum rows to return").range(1, 100),
                ],
                RiskLevel::ReadOnly,
                DisplayType::Table,
            ),
        }
    }
}

#[async_trait]
impl Tool for GetDeploysTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        let range = arg_range(&args)?;
        let now = Utc::now();
        let mut query = TelemetryQuery::new(TableKind::DeployEvents, now - range, now);
        query.service = arg_str(&args, "service");
        query.limit = arg_limit(&args, 20);
        query.order_desc = true;
        let result = run_query(self.store.clone(), query).await?;
        Ok(ToolOutput {
            display: self.spec.display,
            payload: rows_payload(&result),
        })
    }
}

// ---- get_active_alerts ----

pub struct GetActiveAlertsTool {
    catalog: Arc<CatalogStore>,
    spec: ToolSpec,
}

impl GetActiveAlertsTool {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self {
            catalog,
            spec: ToolSpec::new(
                "get_active_alerts",
                "List alerts that are currently active or acknowledged.",
                vec![ParamSpec::integer("limit", "Maximum rows to return").range(1, 100)],
                RiskLevel::ReadOnly,
                DisplayType::Table,
            ),
        }
    }
}

#[async_trait]
impl Tool for GetActiveAlertsTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        let limit = arg_limit(&args, 25);
        let active = self
            .catalog
            .list_alerts(
                &argus_storage::AlertFilter {
                    status: Some(argus_common::types::AlertStatus::Active),
                    severity: None,
                },
                limit,
                0,
            )
            .await
            .map_err(|e| ToolError::new("catalog_error", e.to_string()))?;
        Ok(ToolOutput {
            display: self.spec.display,
            payload: json!({"rows": active, "count": active.len()}),
        })
    }
}

// ---- get_system_status ----

pub struct GetSystemStatusTool {
    store: Arc<dyn TimeSeriesStore>,
    spec: ToolSpec,
}

impl GetSystemStatusTool {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self {
            store,
            spec: ToolSpec::new(
                "get_system_status",
                "Current system snapshot: the latest value of each metric per host.",
                vec![ParamSpec::string("service", "Restrict to one host or service")],
                RiskLevel::ReadOnly,
                DisplayType::JsonTree,
            ),
        }
    }
}

#[async_trait]
impl Tool for GetSystemStatusTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        let now = Utc::now();
        let mut query = TelemetryQuery::new(TableKind::SystemMetrics, now - Duration::minutes(5), now);
        query.service = arg_str(&args, "service");
        query.order_desc = true;
        query.limit = 500;
        let result = run_query(self.store.clone(), query).await?;

        // Newest-first scan: keep the first value seen per (service, metric).
        let mut latest: HashMap<(String, String), Value> = HashMap::new();
        for row in &result.rows {
            if let TelemetryRow::Metric(m) = row {
                latest
                    .entry((m.service.clone(), m.name.clone()))
                    .or_insert_with(|| json!({"value": m.value, "timestamp": m.timestamp}));
            }
        }
        let mut by_service: HashMap<String, serde_json::Map<String, Value>> = HashMap::new();
        for ((service, name), value) in latest {
            by_service.entry(service).or_default().insert(name, value);
        }
        Ok(ToolOutput {
            display: self.spec.display,
            payload: json!({"hosts": by_service}),
        })
    }
}

/// Register every builtin read-only tool.
pub fn register_builtin_tools(
    registry: &crate::ToolRegistry,
    store: Arc<dyn TimeSeriesStore>,
    catalog: Arc<CatalogStore>,
) -> Result<(), String> {
    registry.register(Arc::new(QueryMetricsTool::new(store.clone())))?;
    registry.register(Arc::new(SearchLogsTool::new(store.clone())))?;
    registry.register(Arc::new(GetSdkEventsTool::new(store.clone())))?;
    registry.register(Arc::new(GetTracesTool::new(store.clone())))?;
    registry.register(Arc::new(GetDependencyCallsTool::new(store.clone())))?;
    registry.register(Arc::new(GetDeploysTool::new(store.clone())))?;
    registry.register(Arc::new(GetActiveAlertsTool::new(catalog)))?;
    registry.register(Arc::new(GetSystemStatusTool::new(store)))?;
    Ok(())
}
