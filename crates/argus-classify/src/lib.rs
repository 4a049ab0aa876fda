//! Event classifier: maps raw events to severities with per-kind policy.
//!
//! The classifier is a pure function over the event plus small sliding
//! burst counters keyed by (host, signal). Ties between rules resolve to
//! the highest severity matched.

mod window;

pub use window::SlidingCounter;

use argus_common::types::{Event, EventPayload, Severity};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Burst threshold: this many error hits inside the window escalates.
const BURST_THRESHOLD: usize = 10;
const BURST_WINDOW_SECS: u64 = 60;

/// Metric thresholds: (notable, urgent) per metric name.
fn metric_thresholds(name: &str) -> Option<(f64, f64)> {
    match name {
        "cpu_percent" | "memory_percent" | "disk_percent" | "swap_percent" => Some((80.0, 95.0)),
        "load_1m" | "load_5m" | "load_15m" => Some((4.0, 8.0)),
        _ => None,
    }
}

fn log_keyword_severity(text: &str) -> Severity {
    let lower = text.to_lowercase();
    if lower.contains("fatal") || lower.contains("panic") || lower.contains("out of memory") {
        Severity::Urgent
    } else if lower.contains("error") || lower.contains("exception") {
        Severity::Notable
    } else {
        Severity::Info
    }
}

pub struct Classifier {
    /// (host, signal) -> sliding error counter.
    counters: HashMap<(String, String), SlidingCounter>,
    /// (host, check) -> last observed status, for pass→fail transitions.
    security_state: HashMap<(String, String), String>,
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
            security_state: HashMap::new(),
        }
    }

    /// Classify an event. Mutates only the burst counters and security
    /// transition state; the event itself is never modified.
    pub fn classify(&mut self, event: &Event) -> Severity {
        let now = event.timestamp;
        match &event.payload {
            EventPayload::Metric(m) => match metric_thresholds(&m.name) {
                Some((notable, urgent)) => {
                    if m.value >= urgent {
                        Severity::Urgent
                    } else if m.value >= notable {
                        Severity::Notable
                    } else {
                        Severity::Info
                    }
                }
                None => Severity::Info,
            },
            EventPayload::Log(l) => {
                let keyword = log_keyword_severity(&l.text);
                let level_is_error =
                    matches!(l.level.to_lowercase().as_str(), "error" | "critical" | "fatal");
                if level_is_error {
                    let burst =
                        self.bump_counter(&event.source, &format!("log:{}", l.file), now);
                    if burst >= BURST_THRESHOLD {
                        return Severity::Urgent;
                    }
                    return keyword.max(Severity::Notable);
                }
                keyword
            }
            EventPayload::SdkEvent(e) => {
                if e.event_type == "exception" {
                    // Exceptions group per (service, message) so distinct
                    // failures escalate independently.
                    let message = e
                        .data
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    self.bump_counter(&event.source, &format!("exception:{message}"), now);
                    Severity::Urgent
                } else {
                    Severity::Info
                }
            }
            EventPayload::SecurityFinding(s) => {
                let key = (event.source.clone(), s.check.clone());
                let previous = self.security_state.insert(key, s.status.clone());
                if s.status == "fail" {
                    match previous.as_deref() {
                        // A check flipping from pass (or unseen) to fail is
                        // the urgent transition; repeated fails stay notable.
                        Some("fail") => Severity::Notable,
                        _ => Severity::Urgent,
                    }
                } else {
                    Severity::Info
                }
            }
            EventPayload::Process(p) => match p.state.as_str() {
                "crashed" | "oom_killed" => Severity::Urgent,
                "restart_loop" => Severity::Notable,
                _ => Severity::Info,
            },
            EventPayload::Span(s) => {
                if s.status == "error" {
                    let burst = self.bump_counter(&event.source, "span_errors", now);
                    if burst >= BURST_THRESHOLD {
                        return Severity::Notable;
                    }
                }
                Severity::Info
            }
            EventPayload::Dependency(d) => {
                if d.status == "error" {
                    let burst = self.bump_counter(&event.source, "dep_errors", now);
                    if burst >= BURST_THRESHOLD {
                        return Severity::Notable;
                    }
                }
                Severity::Info
            }
            EventPayload::AlertDerived(_) => Severity::Info,
        }
    }

    fn bump_counter(&mut self, host: &str, signal: &str, now: DateTime<Utc>) -> usize {
        let counter = self
            .counters
            .entry((host.to_string(), signal.to_string()))
            .or_insert_with(|| SlidingCounter::new(BURST_WINDOW_SECS));
        counter.push(now);
        counter.count()
    }

    /// Drop counters whose window has fully expired.
    pub fn gc(&mut self, now: DateTime<Utc>) {
        self.counters.retain(|_, counter| {
            counter.evict(now);
            !counter.is_empty()
        });
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_common::types::{LogPayload, MetricPayload, SecurityPayload, SdkEventPayload};
    use chrono::Duration;
    use std::collections::HashMap as StdHashMap;

    fn event(source: &str, payload: EventPayload) -> Event {
        Event {
            id: argus_common::id::next_id(),
            timestamp: Utc::now(),
            source: source.to_string(),
            severity: Severity::Info,
            message: String::new(),
            payload,
        }
    }

    fn metric(source: &str, name: &str, value: f64) -> Event {
        event(
            source,
            EventPayload::Metric(MetricPayload {
                name: name.to_string(),
                value,
                labels: StdHashMap::new(),
            }),
        )
    }

    fn log_line(source: &str, level: &str, text: &str) -> Event {
        event(
            source,
            EventPayload::Log(LogPayload {
                file: "/var/log/app.log".to_string(),
                line_offset: 0,
                level: level.to_string(),
                text: text.to_string(),
            }),
        )
    }

    #[test]
    fn metric_threshold_crossing() {
        let mut c = Classifier::new();
        assert_eq!(c.classify(&metric("web-01", "cpu_percent", 50.0)), Severity::Info);
        assert_eq!(c.classify(&metric("web-01", "cpu_percent", 85.0)), Severity::Notable);
        assert_eq!(c.classify(&metric("web-01", "cpu_percent", 97.0)), Severity::Urgent);
    }

    #[test]
    fn unknown_metric_stays_info() {
        let mut c = Classifier::new();
        assert_eq!(
            c.classify(&metric("web-01", "requests_per_sec", 9000.0)),
            Severity::Info
        );
    }

    #[test]
    fn log_error_burst_escalates_to_urgent() {
        let mut c = Classifier::new();
        for _ in 0..9 {
            assert_eq!(
                c.classify(&log_line("web-01", "error", "db timeout")),
                Severity::Notable
            );
        }
        // Tenth error inside the window crosses the burst threshold.
        assert_eq!(
            c.classify(&log_line("web-01", "error", "db timeout")),
            Severity::Urgent
        );
    }

    #[test]
    fn log_burst_counters_are_per_host() {
        let mut c = Classifier::new();
        for _ in 0..9 {
            c.classify(&log_line("web-01", "error", "x"));
        }
        // A different host starts its own counter.
        assert_eq!(c.classify(&log_line("web-02", "error", "x")), Severity::Notable);
    }

    #[test]
    fn fatal_keyword_is_urgent_even_at_info_level() {
        let mut c = Classifier::new();
        assert_eq!(
            c.classify(&log_line("web-01", "info", "kernel panic detected")),
            Severity::Urgent
        );
    }

    #[test]
    fn sdk_exception_is_urgent() {
        let mut c = Classifier::new();
        let ev = event(
            "checkout",
            EventPayload::SdkEvent(SdkEventPayload {
                event_type: "exception".to_string(),
                data: serde_json::json!({"message": "NullPointerException"}),
            }),
        );
        assert_eq!(c.classify(&ev), Severity::Urgent);
    }

    #[test]
    fn security_transition_fires_once() {
        let mut c = Classifier::new();
        let fail = |src: &str| {
            event(
                src,
                EventPayload::SecurityFinding(SecurityPayload {
                    check: "ssh_brute_force".to_string(),
                    status: "fail".to_string(),
                    detail: String::new(),
                }),
            )
        };
        assert_eq!(c.classify(&fail("web-01")), Severity::Urgent);
        assert_eq!(c.classify(&fail("web-01")), Severity::Notable);

        // Pass resets the transition.
        let pass = event(
            "web-01",
            EventPayload::SecurityFinding(SecurityPayload {
                check: "ssh_brute_force".to_string(),
                status: "pass".to_string(),
                detail: String::new(),
            }),
        );
        assert_eq!(c.classify(&pass), Severity::Info);
        assert_eq!(c.classify(&fail("web-01")), Severity::Urgent);
    }

    #[test]
    fn gc_drops_expired_counters() {
        let mut c = Classifier::new();
        c.classify(&log_line("web-01", "error", "x"));
        c.gc(Utc::now() + Duration::seconds(BURST_WINDOW_SECS as i64 + 1));
        assert!(c.counters.is_empty());
    }
}
