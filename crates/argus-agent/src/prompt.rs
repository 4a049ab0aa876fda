use argus_common::types::Alert;

/// System prompt for interactive chat runs.
pub const CHAT_SYSTEM_PROMPT: &str = "\
You are Argus, an SRE copilot embedded in an observability platform. You \
can query metrics, logs, traces, dependency calls, deploys and alerts \
through tools, and you can run allow-listed shell commands (destructive \
ones require user approval). Investigate before you conclude: check the \
data, correlate with recent deploys, and state your confidence. Keep \
answers short and operational.";

/// System prompt for autonomous investigations.
pub const INVESTIGATION_SYSTEM_PROMPT: &str = "\
You are Argus, investigating a production alert autonomously. Use the \
tools to establish what happened, when it started, and the most likely \
cause. Finish with a compact incident summary: impact, evidence, \
suspected cause, and a suggested next step. Do not run destructive \
commands.";

/// Compact alert description used as the investigation's opening message.
pub fn investigation_prompt(alert: &Alert) -> String {
    format!(
        "Alert fired: {title} [{severity}]\n\
         Rule: {rule_id}\n\
         Source: {source}\n\
         Summary: {summary}\n\
         Fired at: {timestamp}\n\n\
         Investigate this alert. Establish scope and probable cause.",
        title = alert.title,
        severity = alert.severity,
        rule_id = alert.rule_id,
        source = alert.source,
        summary = alert.summary,
        timestamp = alert.timestamp.to_rfc3339(),
    )
}
