use crate::models::{
    ChatMessage, LlmResponse, SseParser, StreamEvent, StreamSink, ToolCallRequest, ToolDefinition,
};
use crate::retry::{is_retryable_status, with_retries};
use crate::{LlmProvider, LlmSettings};
use anyhow::{Context, Result};
use argus_common::types::TokenUsage;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// OpenAI chat-completions provider (streaming).
#[derive(Clone)]
pub struct OpenAiProvider {
    settings: LlmSettings,
    base_url: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()?;
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            settings,
            base_url,
            client,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let mut msg = json!({"role": m.role, "content": m.content});
                if m.role == "tool" {
                    msg["tool_call_id"] = json!(m.tool_call_id);
                }
                if !m.tool_calls.is_empty() {
                    msg["tool_calls"] = Value::Array(
                        m.tool_calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.arguments.to_string(),
                                    },
                                })
                            })
                            .collect(),
                    );
                }
                msg
            })
            .collect();

        let mut body = json!({
            "model": self.settings.model,
            "messages": wire_messages,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

/// Accumulates streamed tool-call fragments by choice index.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u64, (String, String, String)>,
}

impl ToolCallAccumulator {
    fn push(&mut self, delta: &Value) {
        let Some(items) = delta.get("tool_calls").and_then(|v| v.as_array()) else {
            return;
        };
        for item in items {
            let index = item.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            let entry = self.calls.entry(index).or_default();
            if let Some(id) = item.get("id").and_then(|v| v.as_str()) {
                entry.0.push_str(id);
            }
            if let Some(function) = item.get("function") {
                if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
                    entry.1.push_str(name);
                }
                if let Some(args) = function.get("arguments").and_then(|v| v.as_str()) {
                    entry.2.push_str(args);
                }
            }
        }
    }

    fn finish(self) -> Vec<ToolCallRequest> {
        self.calls
            .into_values()
            .map(|(id, name, args)| ToolCallRequest {
                id,
                name,
                arguments: serde_json::from_str(&args).unwrap_or_else(|_| json!({})),
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn max_response_tokens(&self) -> u64 {
        self.settings.max_tokens
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        sink: StreamSink<'_>,
    ) -> Result<LlmResponse> {
        let body = self.request_body(messages, tools);
        let url = format!("{}/chat/completions", self.base_url);

        let response = with_retries(
            "openai",
            |err: &anyhow::Error| {
                err.downcast_ref::<reqwest::Error>()
                    .map(|e| e.is_connect() || e.is_timeout() || e.status().is_some_and(is_retryable_status))
                    .unwrap_or(false)
            },
            || async {
                let resp = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.settings.api_key)
                    .json(&body)
                    .send()
                    .await
                    .context("openai request failed")?;
                resp.error_for_status().context("openai returned an error")
            },
        )
        .await?;

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut content = String::new();
        let mut tool_calls = ToolCallAccumulator::default();
        let mut finish_reason = String::new();
        let mut usage = TokenUsage::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("openai stream read failed")?;
            let text = String::from_utf8_lossy(&chunk);
            for payload in parser.push(&text) {
                if payload == "[DONE]" {
                    continue;
                }
                let value: Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::debug!(error = %err, "Skipping malformed stream chunk");
                        continue;
                    }
                };
                if let Some(u) = value.get("usage").filter(|u| !u.is_null()) {
                    usage.prompt_tokens =
                        u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    usage.completion_tokens = u
                        .get("completion_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                }
                let Some(choice) = value
                    .get("choices")
                    .and_then(|c| c.as_array())
                    .and_then(|c| c.first())
                else {
                    continue;
                };
                if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
                    finish_reason = reason.to_string();
                }
                if let Some(delta) = choice.get("delta") {
                    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
                        if !text.is_empty() {
                            content.push_str(text);
                            sink(StreamEvent::TextDelta(text.to_string()));
                        }
                    }
                    tool_calls.push(delta);
                }
            }
        }

        let tool_calls = tool_calls.finish();
        for call in &tool_calls {
            sink(StreamEvent::ToolCall(call.clone()));
        }

        Ok(LlmResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_fragmented_tool_calls() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(&json!({"tool_calls": [
            {"index": 0, "id": "call_1", "function": {"name": "query_", "arguments": "{\"na"}}
        ]}));
        acc.push(&json!({"tool_calls": [
            {"index": 0, "function": {"name": "metrics", "arguments": "me\":\"cpu\"}"}}
        ]}));
        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "query_metrics");
        assert_eq!(calls[0].arguments["name"], "cpu");
    }

    #[test]
    fn request_body_includes_tools() {
        let provider = OpenAiProvider::new(LlmSettings::default()).unwrap();
        let body = provider.request_body(
            &[ChatMessage::user("hi")],
            &[ToolDefinition {
                name: "search_logs".to_string(),
                description: "Search the log index".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
        );
        assert_eq!(body["tools"][0]["function"]["name"], "search_logs");
        assert_eq!(body["stream"], true);
    }
}
