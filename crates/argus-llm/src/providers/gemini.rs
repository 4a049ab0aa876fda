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

/// Google Gemini provider (streamGenerateContent over SSE).
#[derive(Clone)]
pub struct GeminiProvider {
    settings: LlmSettings,
    base_url: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()?;
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Ok(Self {
            settings,
            base_url,
            client,
        })
    }

    /// Gemini wants system instructions separate, roles renamed to
    /// user/model, and tool results as functionResponse parts.
    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
        let mut system = String::new();
        let mut contents: Vec<Value> = Vec::new();
        // functionResponse parts need the function name; remember it per
        // call id from the preceding assistant turn.
        let mut call_names: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();

        for msg in messages {
            match msg.role.as_str() {
                "system" => system = msg.content.clone(),
                "assistant" => {
                    let mut parts: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(json!({"text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        call_names.insert(call.id.clone(), call.name.clone());
                        parts.push(json!({
                            "functionCall": {"name": call.name, "args": call.arguments},
                        }));
                    }
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                "tool" => {
                    let name = call_names
                        .get(&msg.tool_call_id)
                        .cloned()
                        .unwrap_or_else(|| msg.tool_call_id.clone());
                    let response: Value = serde_json::from_str(&msg.content)
                        .unwrap_or_else(|_| json!({"output": msg.content}));
                    contents.push(json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {"name": name, "response": response},
                        }],
                    }));
                }
                _ => contents.push(json!({"role": "user", "parts": [{"text": msg.content}]})),
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.settings.temperature,
                "maxOutputTokens": self.settings.max_tokens,
            },
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }))
                    .collect::<Vec<_>>(),
            }]);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
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
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.settings.model
        );

        let response = with_retries(
            "gemini",
            |err: &anyhow::Error| {
                err.downcast_ref::<reqwest::Error>()
                    .map(|e| e.is_connect() || e.is_timeout() || e.status().is_some_and(is_retryable_status))
                    .unwrap_or(false)
            },
            || async {
                let resp = self
                    .client
                    .post(&url)
                    .header("x-goog-api-key", &self.settings.api_key)
                    .json(&body)
                    .send()
                    .await
                    .context("gemini request failed")?;
                resp.error_for_status().context("gemini returned an error")
            },
        )
        .await?;

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut content = String::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        let mut finish_reason = String::new();
        let mut usage = TokenUsage::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("gemini stream read failed")?;
            let text = String::from_utf8_lossy(&chunk);
            for payload in parser.push(&text) {
                let value: Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::debug!(error = %err, "Skipping malformed stream chunk");
                        continue;
                    }
                };
                if let Some(meta) = value.get("usageMetadata") {
                    usage.prompt_tokens = meta
                        .get("promptTokenCount")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(usage.prompt_tokens);
                    usage.completion_tokens = meta
                        .get("candidatesTokenCount")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(usage.completion_tokens);
                }
                let Some(candidate) = value
                    .get("candidates")
                    .and_then(|c| c.as_array())
                    .and_then(|c| c.first())
                else {
                    continue;
                };
                if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
                    finish_reason = reason.to_lowercase();
                }
                let Some(parts) = candidate
                    .pointer("/content/parts")
                    .and_then(|p| p.as_array())
                else {
                    continue;
                };
                for part in parts {
                    if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                        content.push_str(text);
                        sink(StreamEvent::TextDelta(text.to_string()));
                    }
                    if let Some(call) = part.get("functionCall") {
                        let request = ToolCallRequest {
                            // Gemini does not assign call ids; mint one so
                            // results correlate like the other providers.
                            id: format!("gemini_{}", argus_common::id::next_id()),
                            name: call
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                        };
                        sink(StreamEvent::ToolCall(request.clone()));
                        tool_calls.push(request);
                    }
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
    fn roles_map_to_gemini_conventions() {
        let provider = GeminiProvider::new(LlmSettings {
            provider: "gemini".to_string(),
            ..LlmSettings::default()
        })
        .unwrap();
        let body = provider.request_body(
            &[
                ChatMessage::system("You are Argus."),
                ChatMessage::user("hello"),
                ChatMessage::assistant("hi", Vec::new()),
            ],
            &[],
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are Argus.");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn tool_results_reference_the_function_name() {
        let provider = GeminiProvider::new(LlmSettings {
            provider: "gemini".to_string(),
            ..LlmSettings::default()
        })
        .unwrap();
        let body = provider.request_body(
            &[
                ChatMessage::assistant(
                    "",
                    vec![ToolCallRequest {
                        id: "call_7".to_string(),
                        name: "search_logs".to_string(),
                        arguments: json!({"query": "oom"}),
                    }],
                ),
                ChatMessage::tool_result("call_7", "{\"rows\":[]}"),
            ],
            &[],
        );
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(
            contents[1]["parts"][0]["functionResponse"]["name"],
            "search_logs"
        );
    }
}
