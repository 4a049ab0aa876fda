//! LLM provider contract and the OpenAI / Anthropic / Gemini providers.
//!
//! Providers expose a streaming `chat` that pushes deltas to a
//! synchronous sink while accumulating the full turn; transient upstream
//! failures are retried with exponential backoff before surfacing as
//! [`argus_common::error::CoreError::UpstreamUnavailable`].

pub mod models;
pub mod providers;
pub mod retry;

pub use models::{
    estimate_history_tokens, estimate_tokens, ChatMessage, LlmResponse, StreamEvent, StreamSink,
    ToolCallRequest, ToolDefinition,
};

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Configuration for constructing a provider.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// openai | anthropic | gemini
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub max_tokens: u64,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key: String::new(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.1,
            timeout_secs: 120,
        }
    }
}

/// An LLM provider capable of streaming tool-use conversations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Maximum context window size in tokens.
    fn max_context_tokens(&self) -> u64 {
        128_000
    }

    /// Maximum tokens a single response may produce; used by budget
    /// admission estimates.
    fn max_response_tokens(&self) -> u64;

    /// Run one streaming turn. Text and tool-call deltas are pushed to
    /// `sink` as they arrive; the accumulated turn is returned.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        sink: StreamSink<'_>,
    ) -> Result<LlmResponse>;
}

/// Build a provider from settings. Unknown provider names are an error.
pub fn build_provider(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>> {
    match settings.provider.as_str() {
        "openai" => Ok(Arc::new(providers::openai::OpenAiProvider::new(
            settings.clone(),
        )?)),
        "anthropic" => Ok(Arc::new(providers::anthropic::AnthropicProvider::new(
            settings.clone(),
        )?)),
        "gemini" => Ok(Arc::new(providers::gemini::GeminiProvider::new(
            settings.clone(),
        )?)),
        other => anyhow::bail!("unknown LLM provider: {other}"),
    }
}
