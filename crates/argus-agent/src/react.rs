use crate::memory::ConversationMemory;
use argus_bus::{BusMessage, EventBus};
use argus_budget::BudgetHandle;
use argus_common::protocol::{ServerBody, ServerMessage};
use argus_common::types::{DisplayType, Priority, TerminationReason, TokenUsage};
use argus_llm::{
    estimate_history_tokens, ChatMessage, LlmProvider, StreamEvent, ToolDefinition,
};
use argus_tools::{dispatch, ToolContext, ToolRegistry};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing;

/// Default cap on tool-call rounds per run.
pub const DEFAULT_MAX_STEPS: u32 = 12;

/// Which push messages carry a run's text deltas.
#[derive(Debug, Clone)]
pub enum EmitMode {
    Chat,
    Investigation { investigation_id: String },
}

/// Parameters for one ReAct run.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub run_id: String,
    pub priority: Priority,
    pub mode: EmitMode,
    pub max_steps: u32,
}

impl RunParams {
    pub fn chat(run_id: String) -> Self {
        Self {
            run_id,
            priority: Priority::Routine,
            mode: EmitMode::Chat,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn investigation(run_id: String, investigation_id: String) -> Self {
        Self {
            run_id,
            priority: Priority::Urgent,
            mode: EmitMode::Investigation { investigation_id },
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// Outcome of a completed (or terminated) run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub conversation_id: String,
    pub content: String,
    pub usage: TokenUsage,
    pub steps: u32,
    pub termination: TerminationReason,
}

/// The ReAct loop: multi-turn LLM reasoning with interleaved tool calls,
/// budget admission per turn, streaming deltas, and bounded cancellation.
/// Exclusively owns its run's message list for the duration of the loop.
pub struct ReactLoop {
    provider: Arc<dyn LlmProvider>,
    registry: ToolRegistry,
    budget: BudgetHandle,
    bus: EventBus,
}

impl ReactLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: ToolRegistry,
        budget: BudgetHandle,
        bus: EventBus,
    ) -> Self {
        Self {
            provider,
            registry,
            budget,
            bus,
        }
    }

    fn emit(&self, body: ServerBody) {
        self.bus
            .publish(BusMessage::ReactDelta(ServerMessage::new(body)));
    }

    fn emit_delta(&self, params: &RunParams, content: String) {
        match &params.mode {
            EmitMode::Chat => self.emit(ServerBody::AssistantMessageDelta {
                run_id: params.run_id.clone(),
                content,
            }),
            EmitMode::Investigation { investigation_id } => {
                self.emit(ServerBody::InvestigationUpdate {
                    investigation_id: investigation_id.clone(),
                    content,
                })
            }
        }
    }

    fn emit_error(&self, params: &RunParams, code: &str, message: &str) {
        self.emit(ServerBody::Error {
            code: code.to_string(),
            message: message.to_string(),
            correlation_id: Some(params.run_id.clone()),
        });
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry
            .list_specs()
            .iter()
            .map(|spec| ToolDefinition {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                parameters: spec.json_schema(),
            })
            .collect()
    }

    /// Drive the loop to termination. `cancel` flips to true when the
    /// client (or a resolving alert) cancels the run; teardown is bounded
    /// by the current streaming chunk.
    pub async fn run(
        &self,
        memory: &mut ConversationMemory,
        user_message: &str,
        params: RunParams,
        mut cancel: watch::Receiver<bool>,
    ) -> RunResult {
        let tools = self.tool_definitions();
        let conversation_id = memory.conversation_id.clone();
        memory.push(ChatMessage::user(user_message));

        let mut total_usage = TokenUsage::default();
        let mut steps: u32 = 0;
        let mut final_content = String::new();

        self.emit(ServerBody::ThinkingStart {
            run_id: params.run_id.clone(),
        });

        let result_with = {
            let run_id = params.run_id.clone();
            let conversation_id = conversation_id.clone();
            move |content: String, usage: TokenUsage, steps, termination| RunResult {
                run_id: run_id.clone(),
                conversation_id: conversation_id.clone(),
                content,
                usage,
                steps,
                termination,
            }
        };

        loop {
            if *cancel.borrow() {
                self.emit_error(&params, "cancelled", "run cancelled");
                self.emit(ServerBody::ThinkingEnd {
                    run_id: params.run_id.clone(),
                });
                return result_with(
                    final_content,
                    total_usage,
                    steps,
                    TerminationReason::Cancelled,
                );
            }
            // Keep the history inside the provider context window.
            memory.trim(
                self.provider
                    .max_context_tokens()
                    .saturating_sub(self.provider.max_response_tokens()),
            );

            // 1. Budget admission: history plus the worst-case response.
            let estimate = estimate_history_tokens(memory.messages())
                + self.provider.max_response_tokens();
            let Some(reservation) = self.budget.reserve(params.priority, estimate).await else {
                tracing::warn!(run_id = %params.run_id, estimate, "Run refused by budget");
                self.emit_error(
                    &params,
                    "budget-exhausted",
                    "token budget exhausted, try again later",
                );
                self.emit(ServerBody::ThinkingEnd {
                    run_id: params.run_id.clone(),
                });
                return result_with(
                    final_content,
                    total_usage,
                    steps,
                    TerminationReason::BudgetExhausted,
                );
            };

            // 2-3. Stream the provider turn, forwarding deltas as they
            // arrive. The sink runs synchronously inside the stream read.
            let message_started = AtomicBool::new(false);
            let streamed_chars = AtomicU64::new(0);
            let sink = |event: StreamEvent| match event {
                StreamEvent::TextDelta(text) => {
                    if !message_started.swap(true, Ordering::Relaxed) {
                        if matches!(params.mode, EmitMode::Chat) {
                            self.emit(ServerBody::AssistantMessageStart {
                                run_id: params.run_id.clone(),
                                conversation_id: conversation_id.clone(),
                            });
                        }
                    }
                    streamed_chars.fetch_add(text.len() as u64, Ordering::Relaxed);
                    self.emit_delta(&params, text);
                }
                StreamEvent::ToolCall(call) => {
                    self.emit(ServerBody::ToolCall {
                        run_id: params.run_id.clone(),
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                }
            };

            // Scoped so the turn future's borrow of the history ends
            // before results are appended below.
            let response = {
                let history_estimate = estimate_history_tokens(memory.messages());
                let chat = self.provider.chat(memory.messages(), &tools, &sink);
                tokio::pin!(chat);
                tokio::select! {
                    biased;
                    _ = cancel.changed() => {
                        // Stop after the current streaming chunk: dropping
                        // the pinned future tears the stream down.
                        let consumed = TokenUsage {
                            prompt_tokens: history_estimate,
                            completion_tokens: streamed_chars.load(Ordering::Relaxed) / 4,
                        };
                        self.budget.settle(reservation, consumed).await;
                        self.emit_error(&params, "cancelled", "run cancelled");
                        self.emit(ServerBody::ThinkingEnd {
                            run_id: params.run_id.clone(),
                        });
                        return result_with(
                            final_content,
                            add_usage(total_usage, consumed),
                            steps,
                            TerminationReason::Cancelled,
                        );
                    }
                    res = &mut chat => res,
                }
            };

            // 4. Settle with actuals.
            let response = match response {
                Ok(response) => {
                    self.budget.settle(reservation, response.usage).await;
                    total_usage = add_usage(total_usage, response.usage);
                    response
                }
                Err(err) => {
                    // Provider retries are exhausted by this point.
                    tracing::error!(run_id = %params.run_id, error = %err, "Provider failed");
                    self.budget.settle(reservation, TokenUsage::default()).await;
                    self.emit_error(&params, "upstream_unavailable", "LLM provider unavailable");
                    self.emit(ServerBody::ThinkingEnd {
                        run_id: params.run_id.clone(),
                    });
                    return result_with(
                        final_content,
                        total_usage,
                        steps,
                        TerminationReason::ToolErrorFatal,
                    );
                }
            };

            if !response.content.is_empty() {
                final_content = response.content.clone();
            }

            if message_started.load(Ordering::Relaxed) && matches!(params.mode, EmitMode::Chat) {
                self.emit(ServerBody::AssistantMessageEnd {
                    run_id: params.run_id.clone(),
                });
            }

            if response.tool_calls.is_empty() {
                memory.push(ChatMessage::assistant(response.content.clone(), Vec::new()));
                self.emit(ServerBody::ThinkingEnd {
                    run_id: params.run_id.clone(),
                });
                return result_with(
                    final_content,
                    total_usage,
                    steps,
                    TerminationReason::FinalAnswer,
                );
            }

            // 5. Dispatch each requested tool; errors are data, appended
            // to history so the model can observe and continue.
            memory.push(ChatMessage::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                if *cancel.borrow() {
                    self.emit_error(&params, "cancelled", "run cancelled");
                    self.emit(ServerBody::ThinkingEnd {
                        run_id: params.run_id.clone(),
                    });
                    return result_with(
                        final_content,
                        total_usage,
                        steps,
                        TerminationReason::Cancelled,
                    );
                }

                let ctx = ToolContext {
                    run_id: params.run_id.clone(),
                    conversation_id: conversation_id.clone(),
                };
                let (display, is_error, payload) = match self.registry.get(&call.name) {
                    Some(tool) => {
                        let dispatched = dispatch(tool, call.arguments.clone(), ctx);
                        tokio::pin!(dispatched);
                        let result = tokio::select! {
                            biased;
                            _ = cancel.changed() => None,
                            res = &mut dispatched => Some(res),
                        };
                        match result {
                            None => {
                                self.emit_error(&params, "cancelled", "run cancelled");
                                self.emit(ServerBody::ThinkingEnd {
                                    run_id: params.run_id.clone(),
                                });
                                return result_with(
                                    final_content,
                                    total_usage,
                                    steps,
                                    TerminationReason::Cancelled,
                                );
                            }
                            Some(Ok(output)) => (output.display, false, output.payload),
                            Some(Err(err)) => (
                                DisplayType::JsonTree,
                                true,
                                json!({"code": err.code, "message": err.message}),
                            ),
                        }
                    }
                    None => (
                        DisplayType::JsonTree,
                        true,
                        json!({"code": "unknown_tool", "message": format!("no such tool: {}", call.name)}),
                    ),
                };

                self.emit(ServerBody::ToolResult {
                    run_id: params.run_id.clone(),
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    display,
                    is_error,
                    result: payload.clone(),
                });
                memory.push(ChatMessage::tool_result(
                    call.id.clone(),
                    payload.to_string(),
                ));
            }

            // 6. Step accounting.
            steps += 1;
            if steps >= params.max_steps {
                tracing::warn!(run_id = %params.run_id, steps, "Run hit the step limit");
                let summary = format!(
                    "Stopping after {steps} tool rounds without a final answer. \
                     Partial findings: {}",
                    if final_content.is_empty() {
                        "none"
                    } else {
                        final_content.as_str()
                    }
                );
                if matches!(params.mode, EmitMode::Chat) {
                    self.emit(ServerBody::AssistantMessageStart {
                        run_id: params.run_id.clone(),
                        conversation_id: conversation_id.clone(),
                    });
                }
                self.emit_delta(&params, summary.clone());
                if matches!(params.mode, EmitMode::Chat) {
                    self.emit(ServerBody::AssistantMessageEnd {
                        run_id: params.run_id.clone(),
                    });
                }
                self.emit(ServerBody::ThinkingEnd {
                    run_id: params.run_id.clone(),
                });
                return result_with(summary, total_usage, steps, TerminationReason::MaxSteps);
            }
        }
    }
}

fn add_usage(a: TokenUsage, b: TokenUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: a.prompt_tokens + b.prompt_tokens,
        completion_tokens: a.completion_tokens + b.completion_tokens,
    }
}
