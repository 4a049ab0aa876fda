mod common;

use axum::http::StatusCode;
use common::{build_test_context, build_test_context_with, get, post_json, request, wait_for};
use serde_json::json;

fn cpu_batch(value: f64) -> serde_json::Value {
    json!({
        "events": [{
            "type": "metric",
            "service": "web-01",
            "data": {"name": "cpu_percent", "value": value},
        }],
        "sdk": "argus-python/0.3.0",
    })
}

#[tokio::test]
async fn ingest_then_query_round_trip() {
    let ctx = build_test_context().await.unwrap();

    let (status, body) = post_json(
        &ctx,
        "/ingest",
        json!({
            "events": [{
                "type": "metric",
                "service": "s1",
                "data": {"name": "cpu", "value": 97},
                "timestamp": "2025-01-01T00:00:00Z",
            }],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 1);
    assert_eq!(body["rejected"].as_array().unwrap().len(), 0);

    // The log surface is unaffected.
    let (status, logs) = get(&ctx, "/logs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs.as_array().unwrap().len(), 0);

    // The metric is present in a covering window query.
    use argus_storage::{TableKind, TelemetryQuery, TelemetryRow, TimeSeriesStore};
    use chrono::{Duration, TimeZone, Utc};
    let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let mut query = TelemetryQuery::new(TableKind::SystemMetrics, t - Duration::minutes(1), t + Duration::minutes(1));
    query.name = Some("cpu".to_string());
    let result = ctx.state.store.query(&query).unwrap();
    assert_eq!(result.rows.len(), 1);
    match &result.rows[0] {
        TelemetryRow::Metric(m) => assert_eq!(m.value, 97.0),
        other => panic!("unexpected row: {other:?}"),
    }
}

#[tokio::test]
async fn ingest_partial_acceptance() {
    let ctx = build_test_context().await.unwrap();
    let (status, body) = post_json(
        &ctx,
        "/ingest",
        json!({
            "service": "web-01",
            "events": [
                {"type": "metric", "data": {"name": "cpu_percent", "value": 12}},
                {"type": "metric", "data": {"name": "cpu_percent"}},
                {"type": "flux-capacitor", "data": {}},
            ],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 1);
    let rejected = body["rejected"].as_array().unwrap();
    assert_eq!(rejected.len(), 2);
    assert_eq!(rejected[0]["index"], 1);
    assert_eq!(rejected[1]["index"], 2);
}

#[tokio::test]
async fn ingest_rejects_oversized_batches() {
    let ctx = build_test_context().await.unwrap();
    let events: Vec<serde_json::Value> = (0..1001)
        .map(|_| json!({"type": "metric", "service": "s", "data": {"name": "m", "value": 1}}))
        .collect();
    let (status, body) = post_json(&ctx, "/ingest", json!({"events": events})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("batch too large"));
}

#[tokio::test]
async fn ingest_authentication() {
    let mut config = argus_server::config::ServerConfig::default();
    config.server.api_key = "sekrit-key".to_string();
    let ctx = build_test_context_with(config).await.unwrap();

    let (status, body) = post_json(&ctx, "/ingest", cpu_batch(10.0)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["detail"].as_str().is_some());

    let (status, _) = request(
        &ctx,
        "POST",
        "/ingest",
        Some(cpu_batch(10.0)),
        &[("x-argus-key", "sekrit-key")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &ctx,
        "POST",
        "/ingest",
        Some(cpu_batch(10.0)),
        &[("x-argus-key", "wrong")],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn urgent_cpu_event_fires_one_deduped_alert() {
    let ctx = build_test_context().await.unwrap();

    // Two urgent CPU readings within the cooldown.
    let (status, _) = post_json(&ctx, "/ingest", cpu_batch(97.0)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_json(&ctx, "/ingest", cpu_batch(98.0)).await;
    assert_eq!(status, StatusCode::OK);

    let body = wait_for(&ctx, "/alerts?status=active", |body| {
        body["items"].as_array().is_some_and(|items| !items.is_empty())
    })
    .await;

    let items = body["items"].as_array().unwrap();
    let cpu_alerts: Vec<_> = items
        .iter()
        .filter(|a| a["rule_id"] == "cpu_critical")
        .collect();
    assert_eq!(cpu_alerts.len(), 1, "second event must be suppressed");
    assert_eq!(cpu_alerts[0]["severity"], "URGENT");
    assert_eq!(cpu_alerts[0]["source"], "web-01");
}

#[tokio::test]
async fn acknowledge_and_resolve_lifecycle() {
    let ctx = build_test_context().await.unwrap();
    post_json(&ctx, "/ingest", cpu_batch(99.0)).await;
    let body = wait_for(&ctx, "/alerts?status=active", |body| {
        body["items"].as_array().is_some_and(|items| !items.is_empty())
    })
    .await;
    let alert_id = body["items"][0]["id"].as_str().unwrap().to_string();

    // Acknowledge records the operator and is idempotent.
    let (status, acked) = post_json(
        &ctx,
        &format!("/alerts/{alert_id}/acknowledge"),
        json!({"by": "ops"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(acked["status"], "acknowledged");
    assert_eq!(acked["acknowledged_by"], "ops");

    let (status, again) = post_json(
        &ctx,
        &format!("/alerts/{alert_id}/acknowledge"),
        json!({"by": "someone-else"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["acknowledged_by"], "ops");

    // Resolve, then acknowledge is forbidden.
    let (status, resolved) =
        post_json(&ctx, &format!("/alerts/{alert_id}/resolve"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "resolved");

    let (status, _) = post_json(
        &ctx,
        &format!("/alerts/{alert_id}/acknowledge"),
        json!({"by": "ops"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post_json(&ctx, "/alerts/nope/resolve", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mute_suppresses_until_expiry_semantics() {
    let ctx = build_test_context().await.unwrap();

    let (status, muted) = post_json(
        &ctx,
        "/rules/cpu_critical/mute",
        json!({"duration_hours": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let first_expiry = muted["muted_until"].as_str().unwrap().to_string();

    // A shorter second mute never shortens the window.
    let (_, remuted) = post_json(
        &ctx,
        "/rules/cpu_critical/mute",
        json!({"duration_hours": 0.5}),
    )
    .await;
    assert_eq!(remuted["muted_until"].as_str().unwrap(), first_expiry);

    // Muted: urgent CPU events do not fire.
    post_json(&ctx, "/ingest", cpu_batch(99.0)).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let (_, alerts) = get(&ctx, "/alerts?status=active").await;
    let cpu_alerts = alerts["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|a| a["rule_id"] == "cpu_critical")
        .count();
    assert_eq!(cpu_alerts, 0);

    // Unmute restores firing.
    let (status, _) = post_json(&ctx, "/rules/cpu_critical/unmute", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    post_json(&ctx, "/ingest", cpu_batch(99.0)).await;
    wait_for(&ctx, "/alerts?status=active", |body| {
        body["items"]
            .as_array()
            .is_some_and(|items| items.iter().any(|a| a["rule_id"] == "cpu_critical"))
    })
    .await;

    let (status, _) = post_json(&ctx, "/rules/ghost/mute", json!({"duration_hours": 1})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rules_listing_contains_seeds() {
    let ctx = build_test_context().await.unwrap();
    let (status, rules) = get(&ctx, "/rules").await;
    assert_eq!(status, StatusCode::OK);
    let rules = rules.as_array().unwrap();
    assert!(rules.iter().any(|r| r["id"] == "cpu_critical"));
    assert!(rules.iter().any(|r| r["id"] == "security_event"));
}

#[tokio::test]
async fn budget_status_and_settings() {
    let ctx = build_test_context().await.unwrap();

    let (status, budget) = get(&ctx, "/budget").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(budget["hourly_used"], 0);
    assert_eq!(budget["hourly_limit"], 500_000);

    let (status, settings) = get(&ctx, "/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["llm.provider"], "openai");
    // Secrets never cross the wire.
    assert_eq!(settings["llm.api_key"], "");

    let (status, server_status) = get(&ctx, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(server_status["llm_configured"], false);
}

#[tokio::test]
async fn security_and_investigations_surfaces() {
    let ctx = build_test_context().await.unwrap();

    post_json(
        &ctx,
        "/ingest",
        json!({
            "events": [{
                "type": "security_finding",
                "service": "web-01",
                "data": {"check": "ssh_brute_force", "status": "fail", "detail": "42 attempts"},
            }],
        }),
    )
    .await;

    wait_for(&ctx, "/security", |body| {
        body["findings"].as_array().is_some_and(|f| !f.is_empty())
    })
    .await;

    let (status, investigations) = get(&ctx, "/investigations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(investigations["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn unknown_routes_return_detail_shape() {
    let ctx = build_test_context().await.unwrap();
    let (status, body) = get(&ctx, "/no-such-endpoint").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "not found");
}
