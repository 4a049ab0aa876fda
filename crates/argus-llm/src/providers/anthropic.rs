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

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages-API provider (streaming).
#[derive(Clone)]
pub struct AnthropicProvider {
    settings: LlmSettings,
    base_url: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()?;
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());
        Ok(Self {
            settings,
            base_url,
            client,
        })
    }

    /// Anthropic takes the system prompt as a separate parameter; tool
    /// results ride in user-role `tool_result` content blocks.
    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
        let mut system = String::new();
        let mut wire: Vec<Value> = Vec::new();

        for msg in messages {
            match msg.role.as_str() {
                "system" => system = msg.content.clone(),
                "tool" => wire.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id,
                        "content": msg.content,
                    }],
                })),
                "assistant" if !msg.tool_calls.is_empty() => {
                    let mut content: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(json!({"type": "text", "text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        content.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    wire.push(json!({"role": "assistant", "content": content}));
                }
                _ => wire.push(json!({"role": msg.role, "content": msg.content})),
            }
        }

        let mut body = json!({
            "model": self.settings.model,
            "messages": wire,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn max_context_tokens(&self) -> u64 {
        200_000
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
        let url = format!("{}/v1/messages", self.base_url);

        let response = with_retries(
            "anthropic",
            |err: &anyhow::Error| {
                err.downcast_ref::<reqwest::Error>()
                    .map(|e| e.is_connect() || e.is_timeout() || e.status().is_some_and(is_retryable_status))
                    .unwrap_or(false)
            },
            || async {
                let resp = self
                    .client
                    .post(&url)
                    .header("x-api-key", &self.settings.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
                    .send()
                    .await
                    .context("anthropic request failed")?;
                resp.error_for_status()
                    .context("anthropic returned an error")
            },
        )
        .await?;

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut content = String::new();
        let mut finish_reason = String::new();
        let mut usage = TokenUsage::default();
        // Tool-use blocks stream as a start (id + name) followed by
        // input_json_delta fragments, keyed by content-block index.
        let mut open_blocks: std::collections::BTreeMap<u64, (String, String, String)> =
            std::collections::BTreeMap::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("anthropic stream read failed")?;
            let text = String::from_utf8_lossy(&chunk);
            for payload in parser.push(&text) {
                let value: Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::debug!(error = %err, "Skipping malformed stream chunk");
                        continue;
                    }
                };
                match value.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                    "message_start" => {
                        if let Some(u) = value.pointer("/message/usage") {
                            usage.prompt_tokens =
                                u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                        }
                    }
                    "content_block_start" => {
                        let index = value.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                        if let Some(block) = value.get("content_block") {
                            if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                                let id = block
                                    .get("id")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string();
                                let name = block
                                    .get("name")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string();
                                open_blocks.insert(index, (id, name, String::new()));
                            }
                        }
                    }
                    "content_block_delta" => {
                        let index = value.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                        if let Some(delta) = value.get("delta") {
                            match delta.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                                "text_delta" => {
                                    if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                                        content.push_str(text);
                                        sink(StreamEvent::TextDelta(text.to_string()));
                                    }
                                }
                                "input_json_delta" => {
                                    if let Some(partial) =
                                        delta.get("partial_json").and_then(|v| v.as_str())
                                    {
                                        if let Some(entry) = open_blocks.get_mut(&index) {
                                            entry.2.push_str(partial);
                                        }
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    "content_block_stop" => {
                        let index = value.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                        if let Some((id, name, args)) = open_blocks.remove(&index) {
                            let call = ToolCallRequest {
                                id,
                                name,
                                arguments: serde_json::from_str(&args)
                                    .unwrap_or_else(|_| json!({})),
                            };
                            sink(StreamEvent::ToolCall(call.clone()));
                            tool_calls.push(call);
                        }
                    }
                    "message_delta" => {
                        if let Some(reason) = value
                            .pointer("/delta/stop_reason")
                            .and_then(|v| v.as_str())
                        {
                            finish_reason = reason.to_string();
                        }
                        if let Some(out) = value
                            .pointer("/usage/output_tokens")
                            .and_then(|v| v.as_u64())
                        {
                            usage.completion_tokens = out;
                        }
                    }
                    _ => {}
                }
            }
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
    fn system_prompt_is_a_separate_parameter() {
        let provider = AnthropicProvider::new(LlmSettings {
            provider: "anthropic".to_string(),
            ..LlmSettings::default()
        })
        .unwrap();
        let body = provider.request_body(
            &[
                ChatMessage::system("You are Argus."),
                ChatMessage::user("what is on fire?"),
            ],
            &[],
        );
        assert_eq!(body["system"], "You are Argus.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_results_become_tool_result_blocks() {
        let provider = AnthropicProvider::new(LlmSettings {
            provider: "anthropic".to_string(),
            ..LlmSettings::default()
        })
        .unwrap();
        let body = provider.request_body(
            &[
                ChatMessage::assistant(
                    "",
                    vec![ToolCallRequest {
                        id: "toolu_1".to_string(),
                        name: "query_metrics".to_string(),
                        arguments: json!({"name": "cpu_percent"}),
                    }],
                ),
                ChatMessage::tool_result("toolu_1", "{\"rows\":[]}"),
            ],
            &[],
        );
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["content"][0]["type"], "tool_use");
        assert_eq!(messages[1]["content"][0]["type"], "tool_result");
        assert_eq!(messages[1]["content"][0]["tool_use_id"], "toolu_1");
    }
}
