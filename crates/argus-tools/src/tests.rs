use crate::builtin::{QueryMetricsTool, SearchLogsTool};
use crate::dispatch::{dispatch, ToolContext};
use crate::registry::ToolRegistry;
use crate::{ParamSpec, Tool, ToolOutput, ToolResult, ToolSpec};
use argus_common::types::{DisplayType, RiskLevel};
use argus_storage::engine::SqliteTimeSeriesEngine;
use argus_storage::{LogRow, MetricRow, TelemetryRow, TimeSeriesStore};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

struct EchoTool {
    spec: ToolSpec,
}

impl EchoTool {
    fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "echo",
                "Echo the message back",
                vec![
                    ParamSpec::string("message", "What to echo").required(),
                    ParamSpec::integer("repeat", "Repeat count").range(1, 3),
                ],
                RiskLevel::ReadOnly,
                DisplayType::CodeBlock,
            ),
        }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        Ok(ToolOutput {
            display: DisplayType::CodeBlock,
            payload: json!({"echo": args["message"]}),
        })
    }
}

struct SlowTool {
    spec: ToolSpec,
}

impl SlowTool {
    fn new() -> Self {
        let mut spec = ToolSpec::new(
            "slow",
            "Sleeps past its timeout",
            vec![],
            RiskLevel::ReadOnly,
            DisplayType::Table,
        );
        spec.timeout_secs = 1;
        Self { spec }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: Value, _ctx: ToolContext) -> ToolResult {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        Ok(ToolOutput {
            display: DisplayType::Table,
            payload: json!({}),
        })
    }
}

struct PanicTool {
    spec: ToolSpec,
}

#[async_trait]
impl Tool for PanicTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, _args: Value, _ctx: ToolContext) -> ToolResult {
        panic!("handler exploded");
    }
}

#[test]
fn schema_reflects_params() {
    let tool = EchoTool::new();
    let schema = tool.spec.json_schema();
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["message"]["type"], "string");
    assert_eq!(schema["properties"]["repeat"]["minimum"], 1);
    assert_eq!(schema["required"], json!(["message"]));
}

#[test]
fn validation_rejects_bad_arguments() {
    let spec = EchoTool::new().spec;
    assert!(spec.validate(&json!({"message": "hi"})).is_ok());
    assert!(spec.validate(&json!({})).is_err());
    assert!(spec.validate(&json!({"message": 42})).is_err());
    assert!(spec.validate(&json!({"message": "hi", "bogus": 1})).is_err());
    assert!(spec.validate(&json!({"message": "hi", "repeat": 9})).is_err());
    assert!(spec.validate(&json!([1, 2])).is_err());
}

#[test]
fn registry_rejects_duplicates_and_bad_names() {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool::new())).unwrap();
    assert!(registry.register(Arc::new(EchoTool::new())).is_err());

    let bad = PanicTool {
        spec: ToolSpec::new(
            "not a name",
            "",
            vec![],
            RiskLevel::ReadOnly,
            DisplayType::Table,
        ),
    };
    assert!(registry.register(Arc::new(bad)).is_err());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn dispatch_validates_before_invoking() {
    let tool: Arc<dyn Tool> = Arc::new(EchoTool::new());
    let err = dispatch(tool, json!({"bogus": true}), ToolContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, "invalid_arguments");
}

#[tokio::test]
async fn dispatch_enforces_timeout() {
    let tool: Arc<dyn Tool> = Arc::new(SlowTool::new());
    let err = dispatch(tool, json!({}), ToolContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, "tool_timeout");
}

#[tokio::test]
async fn dispatch_converts_panics_to_error_results() {
    let tool: Arc<dyn Tool> = Arc::new(PanicTool {
        spec: ToolSpec::new(
            "boom",
            "",
            vec![],
            RiskLevel::ReadOnly,
            DisplayType::Table,
        ),
    });
    let err = dispatch(tool, json!({}), ToolContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, "tool_panic");
}

fn seeded_store() -> (TempDir, Arc<SqliteTimeSeriesEngine>) {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(SqliteTimeSeriesEngine::new(dir.path()).unwrap());
    let now = Utc::now();
    let mut rows = Vec::new();
    for i in 0..5 {
        rows.push(TelemetryRow::Metric(MetricRow {
            timestamp: now - Duration::seconds(i * 10),
            service: "web-01".to_string(),
            name: "cpu_percent".to_string(),
            value: 90.0 + i as f64,
            labels: HashMap::new(),
        }));
    }
    rows.push(TelemetryRow::Log(LogRow {
        timestamp: now,
        service: "web-01".to_string(),
        file: "/var/log/app.log".to_string(),
        line_offset: 0,
        level: "error".to_string(),
        message: "connection refused by upstream".to_string(),
    }));
    engine.append(&rows).unwrap();
    (dir, engine)
}

#[tokio::test]
async fn query_metrics_tool_returns_rows_and_summary() {
    let (_dir, engine) = seeded_store();
    let tool = QueryMetricsTool::new(engine);
    let out = tool
        .execute(
            json!({"metric": "cpu_percent", "time_range": "1h"}),
            ToolContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(out.display, DisplayType::MetricsChart);
    assert_eq!(out.payload["summary"]["count"], 5);
    assert_eq!(out.payload["summary"]["max"], 94.0);
}

#[tokio::test]
async fn search_logs_tool_matches_substring() {
    let (_dir, engine) = seeded_store();
    let tool = SearchLogsTool::new(engine);
    let out = tool
        .execute(
            json!({"query": "refused", "time_range": "1h"}),
            ToolContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(out.payload["count"], 1);

    let none = tool
        .execute(
            json!({"query": "no-such-line", "time_range": "1h"}),
            ToolContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(none.payload["count"], 0);
}
