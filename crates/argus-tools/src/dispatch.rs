use crate::{Tool, ToolError, ToolResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing;

/// Per-invocation context handed to tool handlers.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// ReAct run the call belongs to.
    pub run_id: String,
    pub conversation_id: String,
}

/// Dispatch one tool call: validate arguments, run the handler under its
/// timeout, and convert faults (timeouts, panics) into error results.
/// Only the registry lookup failing is reported as an error result too,
/// so the ReAct loop never sees a raised error from dispatch.
pub async fn dispatch(tool: Arc<dyn Tool>, args: Value, ctx: ToolContext) -> ToolResult {
    let spec = tool.spec();
    if let Err(message) = spec.validate(&args) {
        tracing::debug!(tool = spec.name, %message, "Tool argument validation failed");
        return Err(ToolError::invalid_args(message));
    }

    let name = spec.name;
    let timeout_secs = spec.timeout_secs;
    let handle = tokio::spawn({
        let tool = tool.clone();
        async move { tool.execute(args, ctx).await }
    });

    match timeout(Duration::from_secs(timeout_secs), handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            if join_err.is_panic() {
                tracing::error!(tool = name, "Tool handler panicked");
                Err(ToolError::new("tool_panic", format!("{name} handler panicked")))
            } else {
                Err(ToolError::new("tool_cancelled", format!("{name} was cancelled")))
            }
        }
        Err(_) => {
            tracing::warn!(tool = name, timeout_secs, "Tool timed out");
            Err(ToolError::new(
                "tool_timeout",
                format!("{name} did not complete within {timeout_secs}s"),
            ))
        }
    }
}
