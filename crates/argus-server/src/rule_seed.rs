//! Default alert rules, seeded at first start.

use argus_common::types::{EventKind, Severity};
use argus_storage::{AlertRuleRow, CatalogStore};
use chrono::Utc;

struct Seed {
    id: &'static str,
    name: &'static str,
    kinds: &'static [EventKind],
    signal: Option<&'static str>,
    min: Severity,
    max: Option<Severity>,
    cooldown_secs: i64,
    investigate_cooldown_secs: i64,
    auto_investigate: bool,
}

const SEEDS: &[Seed] = &[
    Seed {
        id: "cpu_critical",
        name: "CPU Critical",
        kinds: &[EventKind::Metric],
        signal: Some("cpu_percent"),
        min: Severity::Urgent,
        max: None,
        cooldown_secs: 1800,
        investigate_cooldown_secs: 10800,
        auto_investigate: true,
    },
    Seed {
        id: "memory_critical",
        name: "Memory Critical",
        kinds: &[EventKind::Metric],
        signal: Some("memory_percent"),
        min: Severity::Urgent,
        max: None,
        cooldown_secs: 1800,
        investigate_cooldown_secs: 10800,
        auto_investigate: true,
    },
    Seed {
        id: "disk_critical",
        name: "Disk Critical",
        kinds: &[EventKind::Metric],
        signal: Some("disk_percent"),
        min: Severity::Urgent,
        max: None,
        cooldown_secs: 3600,
        investigate_cooldown_secs: 10800,
        auto_investigate: true,
    },
    Seed {
        id: "process_crash",
        name: "Process Crash",
        kinds: &[EventKind::Process],
        signal: None,
        min: Severity::Urgent,
        max: None,
        cooldown_secs: 300,
        // Crashes are discrete events; re-investigate sooner.
        investigate_cooldown_secs: 3600,
        auto_investigate: true,
    },
    Seed {
        id: "error_burst",
        name: "Error Burst",
        kinds: &[EventKind::Log],
        signal: None,
        min: Severity::Notable,
        max: None,
        cooldown_secs: 600,
        investigate_cooldown_secs: 10800,
        auto_investigate: true,
    },
    Seed {
        id: "security_event",
        name: "Security Event",
        kinds: &[EventKind::SecurityFinding],
        signal: None,
        min: Severity::Notable,
        max: None,
        cooldown_secs: 600,
        // Security warrants more frequent checks.
        investigate_cooldown_secs: 7200,
        auto_investigate: true,
    },
    Seed {
        id: "resource_warning",
        name: "Resource Warning",
        kinds: &[EventKind::Metric],
        signal: Some("*"),
        min: Severity::Notable,
        max: Some(Severity::Notable),
        cooldown_secs: 1800,
        investigate_cooldown_secs: 10800,
        auto_investigate: false,
    },
    Seed {
        id: "sdk_error_spike",
        name: "SDK Error Rate Spike",
        kinds: &[EventKind::SdkEvent],
        signal: Some("exception"),
        min: Severity::Urgent,
        max: None,
        cooldown_secs: 900,
        investigate_cooldown_secs: 10800,
        auto_investigate: true,
    },
    Seed {
        id: "trace_error_burst",
        name: "Trace Error Burst",
        kinds: &[EventKind::Span, EventKind::Dependency],
        signal: None,
        min: Severity::Notable,
        max: None,
        cooldown_secs: 900,
        investigate_cooldown_secs: 10800,
        auto_investigate: false,
    },
];

/// Insert the default rule set if the catalog has no rules yet. Returns
/// the number of rules inserted.
pub async fn seed_default_rules(catalog: &CatalogStore) -> anyhow::Result<usize> {
    if catalog.count_alert_rules().await? > 0 {
        return Ok(0);
    }
    let now = Utc::now();
    let mut inserted = 0;
    for seed in SEEDS {
        let row = AlertRuleRow {
            id: seed.id.to_string(),
            name: seed.name.to_string(),
            event_kinds: seed.kinds.to_vec(),
            signal: seed.signal.map(str::to_string),
            min_severity: seed.min,
            max_severity: seed.max,
            cooldown_secs: seed.cooldown_secs,
            investigate_cooldown_secs: seed.investigate_cooldown_secs,
            auto_investigate: seed.auto_investigate,
            muted_until: None,
            channel: "all".to_string(),
            enabled: true,
            source: "seed".to_string(),
            created_at: now,
            updated_at: now,
        };
        catalog.insert_alert_rule(&row).await?;
        inserted += 1;
    }
    tracing::info!(count = inserted, "Seeded default alert rules");
    Ok(inserted)
}
