use crate::engine::SqliteTimeSeriesEngine;
use crate::{
    Aggregate, AggregateQuery, AlertFilter, AlertRow, AlertRuleRow, CatalogStore, LogRow,
    MetricRow, TableKind, TelemetryQuery, TelemetryRow, TimeSeriesStore,
};
use argus_common::types::{AlertStatus, EventKind, Severity};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tempfile::TempDir;

fn setup() -> (TempDir, SqliteTimeSeriesEngine) {
    argus_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let engine = SqliteTimeSeriesEngine::new(dir.path()).unwrap();
    (dir, engine)
}

fn metric_rows(service: &str, name: &str, values: &[(f64, i64)]) -> Vec<TelemetryRow> {
    let now = Utc::now();
    values
        .iter()
        .map(|(value, secs_ago)| {
            TelemetryRow::Metric(MetricRow {
                timestamp: now - Duration::seconds(*secs_ago),
                service: service.to_string(),
                name: name.to_string(),
                value: *value,
                labels: HashMap::new(),
            })
        })
        .collect()
}

#[test]
fn append_and_query_metrics() {
    let (_dir, engine) = setup();

    let rows = metric_rows("web-01", "cpu_percent", &[(95.0, 10), (90.0, 5), (85.0, 0)]);
    engine.append(&rows).unwrap();

    let mut query = TelemetryQuery::new(
        TableKind::SystemMetrics,
        Utc::now() - Duration::minutes(1),
        Utc::now() + Duration::seconds(1),
    );
    query.name = Some("cpu_percent".to_string());

    let result = engine.query(&query).unwrap();
    assert_eq!(result.rows.len(), 3);
    assert!(!result.truncated);
    assert!(result.rows[0].timestamp() <= result.rows[1].timestamp());
}

#[test]
fn query_does_not_cross_tables() {
    let (_dir, engine) = setup();

    let mut rows = metric_rows("web-01", "cpu_percent", &[(97.0, 0)]);
    rows.push(TelemetryRow::Log(LogRow {
        timestamp: Utc::now(),
        service: "web-01".to_string(),
        file: "/var/log/app.log".to_string(),
        line_offset: 0,
        level: "error".to_string(),
        message: "boom".to_string(),
    }));
    engine.append(&rows).unwrap();

    let logs = engine
        .query(&TelemetryQuery::new(
            TableKind::LogIndex,
            Utc::now() - Duration::minutes(1),
            Utc::now() + Duration::seconds(1),
        ))
        .unwrap();
    assert_eq!(logs.rows.len(), 1);

    let metrics = engine
        .query(&TelemetryQuery::new(
            TableKind::SystemMetrics,
            Utc::now() - Duration::minutes(1),
            Utc::now() + Duration::seconds(1),
        ))
        .unwrap();
    assert_eq!(metrics.rows.len(), 1);
    match &metrics.rows[0] {
        TelemetryRow::Metric(m) => assert_eq!(m.value, 97.0),
        other => panic!("unexpected row: {other:?}"),
    }
}

#[test]
fn query_reports_truncation() {
    let (_dir, engine) = setup();

    let values: Vec<(f64, i64)> = (0..20).map(|i| (i as f64, i)).collect();
    engine
        .append(&metric_rows("web-01", "cpu_percent", &values))
        .unwrap();

    let mut query = TelemetryQuery::new(
        TableKind::SystemMetrics,
        Utc::now() - Duration::minutes(5),
        Utc::now() + Duration::seconds(1),
    );
    query.limit = 5;

    let result = engine.query(&query).unwrap();
    assert_eq!(result.rows.len(), 5);
    assert!(result.truncated);
}

#[test]
fn query_empty_window() {
    let (_dir, engine) = setup();
    let result = engine
        .query(&TelemetryQuery::new(
            TableKind::Spans,
            Utc::now() - Duration::hours(1),
            Utc::now(),
        ))
        .unwrap();
    assert!(result.rows.is_empty());
    assert!(!result.truncated);
}

#[test]
fn rejects_inverted_window() {
    let (_dir, engine) = setup();
    let res = engine.query(&TelemetryQuery::new(
        TableKind::SystemMetrics,
        Utc::now(),
        Utc::now() - Duration::hours(1),
    ));
    assert!(res.is_err());
}

#[test]
fn aggregate_computes_percentiles() {
    let (_dir, engine) = setup();

    let values: Vec<(f64, i64)> = (1..=100).map(|i| (i as f64, 1)).collect();
    engine
        .append(&metric_rows("web-01", "latency_ms", &values))
        .unwrap();

    let result = engine
        .aggregate(&AggregateQuery {
            kind: TableKind::SystemMetrics,
            from: Utc::now() - Duration::minutes(5),
            to: Utc::now() + Duration::seconds(1),
            bucket_secs: 3600,
            group_by_service: false,
            service: None,
            name: Some("latency_ms".to_string()),
            aggregates: vec![Aggregate::Count, Aggregate::Avg, Aggregate::P95],
        })
        .unwrap();

    // All samples share one timestamp second, so a single bucket.
    let total: f64 = result.iter().map(|r| r.values["count"]).sum();
    assert_eq!(total, 100.0);
    let bucket = &result[0];
    assert!(bucket.values["p95"] >= bucket.values["avg"]);
}

#[test]
fn purge_removes_old_partitions() {
    let (_dir, engine) = setup();

    let old = TelemetryRow::Metric(MetricRow {
        timestamp: Utc::now() - Duration::days(40),
        service: "web-01".to_string(),
        name: "cpu_percent".to_string(),
        value: 10.0,
        labels: HashMap::new(),
    });
    let fresh = TelemetryRow::Metric(MetricRow {
        timestamp: Utc::now(),
        service: "web-01".to_string(),
        name: "cpu_percent".to_string(),
        value: 20.0,
        labels: HashMap::new(),
    });
    engine.append(&[old, fresh]).unwrap();
    assert_eq!(engine.list_partitions().unwrap().len(), 2);

    let removed = engine.purge(30).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(engine.list_partitions().unwrap().len(), 1);
}

// ---- Catalog store ----

async fn catalog() -> CatalogStore {
    CatalogStore::connect("sqlite::memory:").await.unwrap()
}

fn sample_rule(id: &str) -> AlertRuleRow {
    AlertRuleRow {
        id: id.to_string(),
        name: format!("Rule {id}"),
        event_kinds: vec![EventKind::Metric],
        signal: None,
        min_severity: Severity::Urgent,
        max_severity: None,
        cooldown_secs: 300,
        investigate_cooldown_secs: 10800,
        auto_investigate: true,
        muted_until: None,
        channel: "none".to_string(),
        enabled: true,
        source: "seed".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn sample_alert(id: &str, rule_id: &str) -> AlertRow {
    AlertRow {
        id: id.to_string(),
        rule_id: rule_id.to_string(),
        rule_name: "CPU Critical".to_string(),
        severity: Severity::Urgent,
        title: "CPU Critical".to_string(),
        summary: "cpu_percent at 97".to_string(),
        source: "web-01".to_string(),
        dedup_key: format!("web-01:{rule_id}"),
        status: AlertStatus::Active,
        timestamp: Utc::now(),
        acknowledged_at: None,
        acknowledged_by: String::new(),
        resolved_at: None,
        investigation_id: None,
    }
}

#[tokio::test]
async fn rule_round_trip_and_mute() {
    let store = catalog().await;
    store.insert_alert_rule(&sample_rule("cpu_critical")).await.unwrap();

    let rule = store.get_alert_rule("cpu_critical").await.unwrap().unwrap();
    assert!(rule.matches(EventKind::Metric, Severity::Urgent));
    assert!(!rule.matches(EventKind::Log, Severity::Urgent));
    assert!(!rule.is_muted(Utc::now()));

    let until = Utc::now() + Duration::hours(1);
    store
        .set_rule_muted_until("cpu_critical", Some(until))
        .await
        .unwrap();
    let rule = store.get_alert_rule("cpu_critical").await.unwrap().unwrap();
    assert!(rule.is_muted(Utc::now()));
    assert!(!rule.is_muted(until + Duration::seconds(1)));
}

#[tokio::test]
async fn alert_lifecycle_persistence() {
    let store = catalog().await;
    store.insert_alert(&sample_alert("a1", "cpu_critical")).await.unwrap();

    let row = store
        .update_alert_status("a1", AlertStatus::Acknowledged, Some("ops"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, AlertStatus::Acknowledged);
    assert_eq!(row.acknowledged_by, "ops");
    assert!(row.acknowledged_at.is_some());

    let row = store
        .update_alert_status("a1", AlertStatus::Resolved, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, AlertStatus::Resolved);
    assert!(row.resolved_at.is_some());
}

#[tokio::test]
async fn alert_list_filters_by_status() {
    let store = catalog().await;
    store.insert_alert(&sample_alert("a1", "r1")).await.unwrap();
    store.insert_alert(&sample_alert("a2", "r1")).await.unwrap();
    store
        .update_alert_status("a2", AlertStatus::Resolved, None)
        .await
        .unwrap();

    let active = store
        .list_alerts(
            &AlertFilter {
                status: Some(AlertStatus::Active),
                severity: None,
            },
            25,
            0,
        )
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "a1");
}

#[tokio::test]
async fn audit_sequence_is_monotonic() {
    let store = catalog().await;
    let s1 = store
        .append_audit("restart nginx", "systemctl restart nginx", "ok", true, true, "c1")
        .await
        .unwrap();
    let s2 = store
        .append_audit("kill 1234", "kill 1234", "ok", true, true, "c1")
        .await
        .unwrap();
    assert!(s2 > s1);

    let rows = store.list_audit(10, 0).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].seq, s2);
}

#[tokio::test]
async fn config_upsert() {
    let store = catalog().await;
    store.set_config("llm.provider", "openai").await.unwrap();
    store.set_config("llm.provider", "anthropic").await.unwrap();
    assert_eq!(
        store.get_config("llm.provider").await.unwrap().as_deref(),
        Some("anthropic")
    );
    assert_eq!(store.list_configs().await.unwrap().len(), 1);
}
