//! Dedup key construction.
//!
//! Repeated alerts collapse onto the finest distinguishing identity each
//! event kind offers: error message for exceptions, name+pid for
//! processes, check id for security findings, the rule itself for
//! system-wide metrics. The per-kind function is the extension point for
//! custom grouping.

use argus_common::types::{Event, EventKind, EventPayload};

/// A dedup key function: event + rule id → grouping key.
pub type DedupKeyFn = fn(&Event, &str) -> String;

/// The default key function for an event kind.
pub fn default_key_fn(kind: EventKind) -> DedupKeyFn {
    match kind {
        EventKind::Log => log_key,
        EventKind::SdkEvent => sdk_event_key,
        EventKind::Process => process_key,
        EventKind::SecurityFinding => security_key,
        EventKind::Span => span_key,
        EventKind::Dependency => dependency_key,
        EventKind::Metric | EventKind::AlertDerived => source_rule_key,
    }
}

/// Build the dedup key for an event under a rule.
pub fn key_for(event: &Event, rule_id: &str) -> String {
    default_key_fn(event.kind())(event, rule_id)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn source_rule_key(event: &Event, rule_id: &str) -> String {
    format!("{}:{}", event.source, rule_id)
}

fn log_key(event: &Event, rule_id: &str) -> String {
    match &event.payload {
        EventPayload::Log(l) => format!(
            "{}:error_burst:{}:{}",
            event.source,
            l.file,
            truncate(l.text.trim(), 80)
        ),
        _ => source_rule_key(event, rule_id),
    }
}

fn sdk_event_key(event: &Event, rule_id: &str) -> String {
    match &event.payload {
        EventPayload::SdkEvent(e) => {
            if e.event_type == "exception" {
                let message = e
                    .data
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                format!(
                    "{}:exception:{}",
                    event.source,
                    truncate(message.trim(), 80)
                )
            } else {
                format!("{}:{}", event.source, e.event_type)
            }
        }
        _ => source_rule_key(event, rule_id),
    }
}

fn process_key(event: &Event, rule_id: &str) -> String {
    match &event.payload {
        EventPayload::Process(p) => {
            // Restart loops group by name alone; a looping process cycles
            // through pids.
            if p.state == "restart_loop" {
                format!("{}:process_crash:{}", event.source, p.name)
            } else {
                format!("{}:process_crash:{}:{}", event.source, p.name, p.pid)
            }
        }
        _ => source_rule_key(event, rule_id),
    }
}

fn security_key(event: &Event, rule_id: &str) -> String {
    match &event.payload {
        EventPayload::SecurityFinding(s) => {
            format!("{}:security_event:{}", event.source, s.check)
        }
        _ => source_rule_key(event, rule_id),
    }
}

fn span_key(event: &Event, rule_id: &str) -> String {
    match &event.payload {
        EventPayload::Span(s) => format!("{}:span:{}", event.source, s.name),
        _ => source_rule_key(event, rule_id),
    }
}

fn dependency_key(event: &Event, rule_id: &str) -> String {
    match &event.payload {
        EventPayload::Dependency(d) => format!("{}:dep:{}", event.source, d.target),
        _ => source_rule_key(event, rule_id),
    }
}
