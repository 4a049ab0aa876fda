use crate::dedup;
use argus_common::error::CoreError;
use argus_common::types::{Alert, AlertStatus, Event, EventPayload, Severity};
use argus_storage::AlertRuleRow;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing;

/// Safety cap: an acknowledgement suppresses its dedup key for at most
/// this long even if matching events never stop.
const ACK_MAX_HOURS: i64 = 24;

/// A fired alert plus the routing the caller must perform.
#[derive(Debug, Clone)]
pub struct FiredAlert {
    pub alert: Alert,
    /// Notification channel selector from the rule (`none` skips sinks).
    pub channel: String,
    /// The rule wants an auto-investigation and its investigation
    /// cooldown has elapsed. The caller still gates on severity and the
    /// budget reserve, then confirms with [`AlertEngine::mark_investigated`].
    pub wants_investigation: bool,
}

/// The alert engine: rule matching, cooldown, dedup, mute, and the
/// acknowledge/resolve lifecycle. Exclusively owns in-flight alerts;
/// other components read copies via bus messages or the catalog.
pub struct AlertEngine {
    rules: Vec<AlertRuleRow>,
    /// (rule_id, dedup_key) -> id of the tracked active alert.
    active: HashMap<(String, String), String>,
    /// All alerts this process has fired, by id.
    alerts: HashMap<String, Alert>,
    /// dedup_key -> last fire time (cooldown).
    last_fired: HashMap<String, DateTime<Utc>>,
    /// dedup_key -> last investigation time (separate, longer cooldown).
    last_investigated: HashMap<String, DateTime<Utc>>,
    /// dedup_key -> last matching event time (ack gap detection).
    last_event_seen: HashMap<String, DateTime<Utc>>,
    /// dedup_key -> acknowledgement suppression expiry.
    acknowledged_keys: HashMap<String, DateTime<Utc>>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRuleRow>) -> Self {
        Self {
            rules,
            active: HashMap::new(),
            alerts: HashMap::new(),
            last_fired: HashMap::new(),
            last_investigated: HashMap::new(),
            last_event_seen: HashMap::new(),
            acknowledged_keys: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &[AlertRuleRow] {
        &self.rules
    }

    pub fn get_rule(&self, id: &str) -> Option<&AlertRuleRow> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Replace the rule set (after catalog mutation).
    pub fn replace_rules(&mut self, rules: Vec<AlertRuleRow>) {
        self.rules = rules;
    }

    /// Evaluate all rules against a classified event. Each matching rule
    /// fires independently; one event may produce multiple alerts.
    pub fn handle_event(&mut self, event: &Event, now: DateTime<Utc>) -> Vec<FiredAlert> {
        let mut fired = Vec::new();
        if event.severity <= Severity::Info {
            return fired;
        }

        for idx in 0..self.rules.len() {
            let rule = &self.rules[idx];
            if !rule.enabled || !rule.matches(event.kind(), event.severity) {
                continue;
            }
            if !signal_matches(rule.signal.as_deref(), event) {
                continue;
            }
            if rule.is_muted(now) {
                tracing::debug!(rule_id = %rule.id, "Alert suppressed (rule muted)");
                continue;
            }

            let rule = self.rules[idx].clone();
            let dedup_key = dedup::key_for(event, &rule.id);

            let previous_seen = self.last_event_seen.get(&dedup_key).copied();
            self.last_event_seen.insert(dedup_key.clone(), now);

            if self.is_acknowledged(&dedup_key, &rule, previous_seen, now) {
                tracing::debug!(dedup_key = %dedup_key, "Alert suppressed (acknowledged)");
                continue;
            }

            // One active alert per (rule, dedup_key) until the cooldown
            // elapses or the alert resolves.
            let active_key = (rule.id.clone(), dedup_key.clone());
            if let Some(active_id) = self.active.get(&active_key) {
                let still_active = self
                    .alerts
                    .get(active_id)
                    .is_some_and(|a| a.status != AlertStatus::Resolved);
                if still_active {
                    let within_cooldown = self.last_fired.get(&dedup_key).is_some_and(|last| {
                        now - *last < Duration::seconds(rule.cooldown_secs)
                    });
                    if within_cooldown {
                        tracing::debug!(
                            rule_id = %rule.id,
                            dedup_key = %dedup_key,
                            "Alert suppressed (cooldown)"
                        );
                        continue;
                    }
                }
            }

            self.last_fired.insert(dedup_key.clone(), now);

            let alert = Alert {
                id: argus_common::id::next_id(),
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                severity: event.severity,
                title: rule.name.clone(),
                summary: if event.message.is_empty() {
                    format!("{} event from {}", event.kind(), event.source)
                } else {
                    event.message.clone()
                },
                source: event.source.clone(),
                dedup_key: dedup_key.clone(),
                timestamp: now,
                status: AlertStatus::Active,
                acknowledged_at: None,
                acknowledged_by: String::new(),
                resolved_at: None,
                investigation_id: None,
            };
            tracing::info!(
                rule_id = %rule.id,
                severity = %event.severity,
                source = %event.source,
                "Alert fired: {}",
                rule.name
            );

            self.active.insert(active_key, alert.id.clone());
            self.alerts.insert(alert.id.clone(), alert.clone());

            let wants_investigation = rule.auto_investigate
                && event.severity == Severity::Urgent
                && !self.investigation_cooldown_active(&dedup_key, &rule, now);

            fired.push(FiredAlert {
                alert,
                channel: rule.channel.clone(),
                wants_investigation,
            });
        }
        fired
    }

    fn investigation_cooldown_active(
        &self,
        dedup_key: &str,
        rule: &AlertRuleRow,
        now: DateTime<Utc>,
    ) -> bool {
        self.last_investigated.get(dedup_key).is_some_and(|last| {
            now - *last < Duration::seconds(rule.investigate_cooldown_secs)
        })
    }

    /// Record that an investigation was actually started for this key.
    pub fn mark_investigated(&mut self, dedup_key: &str, now: DateTime<Utc>) {
        self.last_investigated.insert(dedup_key.to_string(), now);
    }

    /// Check acknowledgement suppression. A gap in matching events longer
    /// than the rule cooldown means the condition resolved and restarted:
    /// the acknowledgement is auto-cleared.
    fn is_acknowledged(
        &mut self,
        dedup_key: &str,
        rule: &AlertRuleRow,
        previous_seen: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(expires) = self.acknowledged_keys.get(dedup_key).copied() else {
            return false;
        };
        if let Some(seen) = previous_seen {
            let gap = now - seen;
            if gap > Duration::seconds(rule.cooldown_secs) {
                self.acknowledged_keys.remove(dedup_key);
                tracing::info!(
                    dedup_key = %dedup_key,
                    gap_secs = gap.num_seconds(),
                    "Ack auto-cleared (event gap exceeded cooldown)"
                );
                return false;
            }
        }
        if now >= expires {
            self.acknowledged_keys.remove(dedup_key);
            return false;
        }
        true
    }

    /// Acknowledge an alert. Idempotent from `acknowledged`; forbidden
    /// from `resolved`.
    pub fn acknowledge(
        &mut self,
        alert_id: &str,
        by: &str,
        now: DateTime<Utc>,
    ) -> Result<Alert, CoreError> {
        let alert = self.alerts.get_mut(alert_id).ok_or(CoreError::NotFound {
            entity: "alert",
            id: alert_id.to_string(),
        })?;
        match alert.status {
            AlertStatus::Acknowledged => Ok(alert.clone()),
            AlertStatus::Resolved => Err(CoreError::Conflict(
                "cannot acknowledge a resolved alert".to_string(),
            )),
            AlertStatus::Active => {
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_at = Some(now);
                alert.acknowledged_by = by.to_string();
                self.acknowledged_keys.insert(
                    alert.dedup_key.clone(),
                    now + Duration::hours(ACK_MAX_HOURS),
                );
                Ok(alert.clone())
            }
        }
    }

    /// Resolve an alert. Returns the alert and the id of any in-flight
    /// investigation the caller must cancel. Idempotent from `resolved`.
    pub fn resolve(
        &mut self,
        alert_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Alert, Option<String>), CoreError> {
        let alert = self.alerts.get_mut(alert_id).ok_or(CoreError::NotFound {
            entity: "alert",
            id: alert_id.to_string(),
        })?;
        if alert.status == AlertStatus::Resolved {
            return Ok((alert.clone(), None));
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        let investigation = alert.investigation_id.clone();
        let dedup_key = alert.dedup_key.clone();
        let snapshot = alert.clone();
        self.acknowledged_keys.remove(&dedup_key);
        self.active
            .remove(&(snapshot.rule_id.clone(), dedup_key));
        Ok((snapshot, investigation))
    }

    pub fn set_investigation(&mut self, alert_id: &str, investigation_id: &str) {
        if let Some(alert) = self.alerts.get_mut(alert_id) {
            alert.investigation_id = Some(investigation_id.to_string());
        }
    }

    /// Extend a rule's mute window: `max(now + duration, previous expiry)`.
    /// Returns the new expiry, or `None` if the rule is unknown.
    pub fn mute_rule(
        &mut self,
        rule_id: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let rule = self.rules.iter_mut().find(|r| r.id == rule_id)?;
        let candidate = now + duration;
        let expiry = match rule.muted_until {
            Some(prev) if prev > candidate => prev,
            _ => candidate,
        };
        rule.muted_until = Some(expiry);
        tracing::info!(rule_id = %rule_id, until = %expiry, "Rule muted");
        Some(expiry)
    }

    /// Clear a rule's mute. Returns false for unknown rules.
    pub fn unmute_rule(&mut self, rule_id: &str) -> bool {
        match self.rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.muted_until = None;
                tracing::info!(rule_id = %rule_id, "Rule unmuted");
                true
            }
            None => false,
        }
    }

    pub fn get_alert(&self, alert_id: &str) -> Option<&Alert> {
        self.alerts.get(alert_id)
    }

    pub fn active_alerts(&self) -> Vec<&Alert> {
        self.alerts
            .values()
            .filter(|a| a.status != AlertStatus::Resolved)
            .collect()
    }
}

/// The signal name a rule's glob filter applies to, per event kind.
pub fn event_signal(event: &Event) -> Option<&str> {
    match &event.payload {
        EventPayload::Metric(m) => Some(&m.name),
        EventPayload::SdkEvent(e) => Some(&e.event_type),
        EventPayload::SecurityFinding(s) => Some(&s.check),
        EventPayload::Process(p) => Some(&p.state),
        EventPayload::Log(l) => Some(&l.level),
        EventPayload::Span(s) => Some(&s.name),
        EventPayload::Dependency(d) => Some(&d.target),
        EventPayload::AlertDerived(_) => None,
    }
}

fn signal_matches(pattern: Option<&str>, event: &Event) -> bool {
    let Some(pattern) = pattern else { return true };
    if pattern == "*" {
        return true;
    }
    match event_signal(event) {
        Some(signal) => glob_match::glob_match(pattern, signal),
        None => false,
    }
}
