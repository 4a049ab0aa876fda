use crate::investigator::{InvestigationRequest, Investigator};
use crate::memory::ConversationMemory;
use crate::react::{ReactLoop, RunParams};
use argus_budget::{BudgetConfig, BudgetHandle};
use argus_bus::{BusMessage, EventBus, Topic};
use argus_common::protocol::ServerBody;
use argus_common::types::{
    Alert, AlertStatus, DisplayType, RiskLevel, Severity, TerminationReason, TokenUsage,
};
use argus_llm::{ChatMessage, LlmProvider, LlmResponse, StreamEvent, StreamSink, ToolCallRequest, ToolDefinition};
use argus_storage::CatalogStore;
use argus_tools::{ParamSpec, Tool, ToolContext, ToolOutput, ToolRegistry, ToolResult, ToolSpec};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// One scripted provider turn.
struct Scripted {
    deltas: Vec<&'static str>,
    tool_calls: Vec<ToolCallRequest>,
}

struct ScriptedProvider {
    turns: Mutex<VecDeque<Scripted>>,
    hang: bool,
}

impl ScriptedProvider {
    fn new(turns: Vec<Scripted>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            hang: false,
        }
    }

    fn hanging() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            hang: true,
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    fn max_response_tokens(&self) -> u64 {
        100
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        sink: StreamSink<'_>,
    ) -> anyhow::Result<LlmResponse> {
        if self.hang {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
        let turn = self.turns.lock().unwrap().pop_front();
        let turn = turn.unwrap_or(Scripted {
            deltas: vec!["done"],
            tool_calls: vec![],
        });
        let mut content = String::new();
        for delta in &turn.deltas {
            content.push_str(delta);
            sink(StreamEvent::TextDelta(delta.to_string()));
        }
        for call in &turn.tool_calls {
            sink(StreamEvent::ToolCall(call.clone()));
        }
        Ok(LlmResponse {
            content,
            tool_calls: turn.tool_calls,
            finish_reason: if turn.deltas.is_empty() { "tool_calls" } else { "stop" }.to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
        })
    }
}

struct ProbeTool {
    spec: ToolSpec,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl ProbeTool {
    fn new(calls: Arc<Mutex<Vec<Value>>>) -> Self {
        Self {
            spec: ToolSpec::new(
                "probe",
                "Records its arguments",
                vec![ParamSpec::string("target", "What to probe")],
                RiskLevel::ReadOnly,
                DisplayType::Table,
            ),
            calls,
        }
    }
}

#[async_trait]
impl Tool for ProbeTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> ToolResult {
        self.calls.lock().unwrap().push(args.clone());
        Ok(ToolOutput {
            display: DisplayType::Table,
            payload: json!({"probed": args["target"]}),
        })
    }
}

struct Harness {
    react: ReactLoop,
    bus: EventBus,
    calls: Arc<Mutex<Vec<Value>>>,
}

fn harness(provider: ScriptedProvider, hourly_limit: u64) -> Harness {
    argus_common::id::init(1, 1);
    let bus = EventBus::new();
    let budget = BudgetHandle::spawn(
        BudgetConfig {
            hourly_limit,
            daily_limit: hourly_limit * 10,
        },
        bus.clone(),
    );
    let registry = ToolRegistry::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    registry
        .register(Arc::new(ProbeTool::new(calls.clone())))
        .unwrap();
    Harness {
        react: ReactLoop::new(Arc::new(provider), registry, budget, bus.clone()),
        bus,
        calls,
    }
}

fn never_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Keep the sender alive for the test duration.
    std::mem::forget(tx);
    rx
}

fn drain_bodies(sub: &argus_bus::Subscription) -> Vec<ServerBody> {
    let mut bodies = Vec::new();
    while let Some(msg) = sub.try_recv() {
        if let BusMessage::ReactDelta(m) = msg {
            bodies.push(m.body);
        }
    }
    bodies
}

#[tokio::test]
async fn final_answer_streams_in_order() {
    let h = harness(
        ScriptedProvider::new(vec![Scripted {
            deltas: vec!["All ", "quiet."],
            tool_calls: vec![],
        }]),
        100_000,
    );
    let sub = h.bus.subscribe(&[Topic::ReactDelta], 64);

    let mut memory = ConversationMemory::new("system");
    let result = h
        .react
        .run(
            &mut memory,
            "how are things?",
            RunParams::chat("run-1".to_string()),
            never_cancel(),
        )
        .await;

    assert_eq!(result.termination, TerminationReason::FinalAnswer);
    assert_eq!(result.content, "All quiet.");
    assert_eq!(result.usage.total(), 15);

    let bodies = drain_bodies(&sub);
    let kinds: Vec<&str> = bodies
        .iter()
        .map(|b| match b {
            ServerBody::ThinkingStart { .. } => "thinking_start",
            ServerBody::AssistantMessageStart { .. } => "start",
            ServerBody::AssistantMessageDelta { .. } => "delta",
            ServerBody::AssistantMessageEnd { .. } => "end",
            ServerBody::ThinkingEnd { .. } => "thinking_end",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["thinking_start", "start", "delta", "delta", "end", "thinking_end"]
    );
}

#[tokio::test]
async fn tool_round_trip_appends_results_and_continues() {
    let h = harness(
        ScriptedProvider::new(vec![
            Scripted {
                deltas: vec![],
                tool_calls: vec![ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "probe".to_string(),
                    arguments: json!({"target": "db"}),
                }],
            },
            Scripted {
                deltas: vec!["The db looks fine."],
                tool_calls: vec![],
            },
        ]),
        100_000,
    );
    let sub = h.bus.subscribe(&[Topic::ReactDelta], 64);

    let mut memory = ConversationMemory::new("system");
    let result = h
        .react
        .run(
            &mut memory,
            "check the db",
            RunParams::chat("run-1".to_string()),
            never_cancel(),
        )
        .await;

    assert_eq!(result.termination, TerminationReason::FinalAnswer);
    assert_eq!(result.steps, 1);
    assert_eq!(h.calls.lock().unwrap().len(), 1);

    // tool_call precedes its tool_result on the stream.
    let bodies = drain_bodies(&sub);
    let call_pos = bodies
        .iter()
        .position(|b| matches!(b, ServerBody::ToolCall { .. }))
        .unwrap();
    let result_pos = bodies
        .iter()
        .position(|b| matches!(b, ServerBody::ToolResult { .. }))
        .unwrap();
    assert!(call_pos < result_pos);

    // History carries the tool result back to the model.
    assert!(memory.messages().iter().any(|m| m.role == "tool"));
}

#[tokio::test]
async fn unknown_tool_is_survivable() {
    let h = harness(
        ScriptedProvider::new(vec![
            Scripted {
                deltas: vec![],
                tool_calls: vec![ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "no_such_tool".to_string(),
                    arguments: json!({}),
                }],
            },
            Scripted {
                deltas: vec!["recovered"],
                tool_calls: vec![],
            },
        ]),
        100_000,
    );
    let sub = h.bus.subscribe(&[Topic::ReactDelta], 64);

    let mut memory = ConversationMemory::new("system");
    let result = h
        .react
        .run(
            &mut memory,
            "go",
            RunParams::chat("run-1".to_string()),
            never_cancel(),
        )
        .await;

    assert_eq!(result.termination, TerminationReason::FinalAnswer);
    let bodies = drain_bodies(&sub);
    assert!(bodies.iter().any(|b| matches!(
        b,
        ServerBody::ToolResult { is_error: true, .. }
    )));
}

#[tokio::test]
async fn budget_refusal_terminates_with_error() {
    let h = harness(
        ScriptedProvider::new(vec![Scripted {
            deltas: vec!["never sent"],
            tool_calls: vec![],
        }]),
        // Routine cap (60%) is far below the admission estimate.
        10,
    );
    let sub = h.bus.subscribe(&[Topic::ReactDelta], 64);

    let mut memory = ConversationMemory::new("system");
    let result = h
        .react
        .run(
            &mut memory,
            "hello",
            RunParams::chat("run-1".to_string()),
            never_cancel(),
        )
        .await;

    assert_eq!(result.termination, TerminationReason::BudgetExhausted);
    let bodies = drain_bodies(&sub);
    assert!(bodies.iter().any(|b| matches!(
        b,
        ServerBody::Error { code, .. } if code == "budget-exhausted"
    )));
}

#[tokio::test]
async fn max_steps_produces_summary_turn() {
    let tool_turn = || Scripted {
        deltas: vec![],
        tool_calls: vec![ToolCallRequest {
            id: "call".to_string(),
            name: "probe".to_string(),
            arguments: json!({"target": "x"}),
        }],
    };
    let h = harness(
        ScriptedProvider::new(vec![tool_turn(), tool_turn(), tool_turn()]),
        100_000,
    );

    let mut memory = ConversationMemory::new("system");
    let mut params = RunParams::chat("run-1".to_string());
    params.max_steps = 2;
    let result = h
        .react
        .run(&mut memory, "loop forever", params, never_cancel())
        .await;

    assert_eq!(result.termination, TerminationReason::MaxSteps);
    assert_eq!(result.steps, 2);
    assert!(result.content.contains("tool rounds"));
}

#[tokio::test]
async fn cancel_settles_budget_and_stops_quickly() {
    let h = harness(ScriptedProvider::hanging(), 100_000);
    let sub = h.bus.subscribe(&[Topic::ReactDelta], 64);

    let (cancel_tx, cancel_rx) = watch::channel(false);

    let started = std::time::Instant::now();
    let react = h.react;
    let handle = tokio::spawn(async move {
        let mut memory = ConversationMemory::new("system");
        react
            .run(
                &mut memory,
                "slow question",
                RunParams::chat("run-1".to_string()),
                cancel_rx,
            )
            .await
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel_tx.send(true).unwrap();

    let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("cancellation exceeded the teardown bound")
        .unwrap();
    assert_eq!(result.termination, TerminationReason::Cancelled);
    assert!(started.elapsed() < std::time::Duration::from_secs(2));

    let bodies = drain_bodies(&sub);
    assert!(bodies.iter().any(|b| matches!(
        b,
        ServerBody::Error { code, .. } if code == "cancelled"
    )));
}

#[tokio::test]
async fn investigation_persists_and_emits_lifecycle() {
    argus_common::id::init(1, 1);
    let bus = EventBus::new();
    let budget = BudgetHandle::spawn(
        BudgetConfig {
            hourly_limit: 100_000,
            daily_limit: 1_000_000,
        },
        bus.clone(),
    );
    let catalog = Arc::new(CatalogStore::connect("sqlite::memory:").await.unwrap());
    let registry = ToolRegistry::new();
    let react = Arc::new(ReactLoop::new(
        Arc::new(ScriptedProvider::new(vec![Scripted {
            deltas: vec!["Root cause: disk full."],
            tool_calls: vec![],
        }])),
        registry,
        budget.clone(),
        bus.clone(),
    ));

    // The alert row must exist for the investigation back-reference.
    let alert = Alert {
        id: "alert-1".to_string(),
        rule_id: "disk_critical".to_string(),
        rule_name: "Disk Critical".to_string(),
        severity: Severity::Urgent,
        title: "Disk Critical".to_string(),
        summary: "disk_percent at 98".to_string(),
        source: "web-01".to_string(),
        dedup_key: "web-01:disk_critical".to_string(),
        timestamp: Utc::now(),
        status: AlertStatus::Active,
        acknowledged_at: None,
        acknowledged_by: String::new(),
        resolved_at: None,
        investigation_id: None,
    };
    catalog.insert_alert(&(&alert).into()).await.unwrap();

    let sub = bus.subscribe(&[Topic::ReactDelta], 64);
    let investigator = Investigator::spawn(react, catalog.clone(), bus.clone(), budget);
    let status = investigator
        .enqueue(InvestigationRequest { alert })
        .await;
    assert_eq!(status, crate::investigator::InvestigationStatus::Queued);

    // Wait for investigation_end on the stream.
    let mut ended_summary = None;
    for _ in 0..200 {
        match tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv()).await {
            Ok(BusMessage::ReactDelta(msg)) => {
                if let ServerBody::InvestigationEnd { summary, .. } = msg.body {
                    ended_summary = Some(summary);
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => {}
        }
    }
    let summary = ended_summary.expect("investigation did not complete");
    assert!(summary.contains("disk full"));

    let rows = catalog.list_investigations(10, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "completed");
    assert!(rows[0].tokens_used > 0);

    let alert_row = catalog.get_alert("alert-1").await.unwrap().unwrap();
    assert_eq!(alert_row.investigation_id, Some(rows[0].id.clone()));
}
