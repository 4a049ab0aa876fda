use crate::engine::ActionEngine;
use argus_common::error::CoreError;
use argus_common::types::{DisplayType, RiskLevel};
use argus_tools::{ParamSpec, Tool, ToolContext, ToolError, ToolOutput, ToolResult, ToolSpec};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Shell execution tool. The declared risk is MEDIUM so dispatch routes
/// it through approval; the sandbox refines the actual risk per command
/// (read-only diagnostics auto-approve).
pub struct RunCommandTool {
    engine: ActionEngine,
    spec: ToolSpec,
}

impl RunCommandTool {
    pub fn new(engine: ActionEngine) -> Self {
        let mut spec = ToolSpec::new(
            "run_command",
            "Run an allow-listed shell command on the host. Destructive commands require \
             user approval and may be refused.",
            vec![
                ParamSpec::string("command", "The command line to execute, e.g. 'df -h'")
                    .required(),
                ParamSpec::string("description", "Why this command is needed"),
            ],
            RiskLevel::Medium,
            DisplayType::CommandOutput,
        );
        // Approval wait dominates the handler budget.
        spec.timeout_secs = crate::engine::APPROVAL_TIMEOUT_SECS + 60;
        Self { engine, spec }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: Value, ctx: ToolContext) -> ToolResult {
        let command_line = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let command: Vec<String> = command_line
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if command.is_empty() {
            return Err(ToolError::invalid_args("command must not be empty"));
        }
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match self
            .engine
            .propose(&ctx.run_id, "run_command", command, description)
            .await
        {
            Ok(completion) => Ok(ToolOutput {
                display: DisplayType::CommandOutput,
                payload: json!({
                    "exit_code": completion.exit_code,
                    "stdout": completion.stdout,
                    "stderr": completion.stderr,
                    "duration_ms": completion.duration_ms,
                }),
            }),
            Err(CoreError::ActionRejected(reason)) => Err(ToolError::new("action_rejected", reason)),
            Err(CoreError::ActionTimedOut) => Err(ToolError::new(
                "action_timed_out",
                "no approval arrived before the timeout",
            )),
            Err(other) => Err(ToolError::new(other.code(), other.to_string())),
        }
    }
}
