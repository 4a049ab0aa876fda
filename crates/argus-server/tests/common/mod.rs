#![allow(dead_code)]

use anyhow::Result;
use argus_actions::{ActionEngine, CommandSandbox};
use argus_alert::AlertEngine;
use argus_budget::{BudgetConfig, BudgetHandle};
use argus_bus::EventBus;
use argus_notify::{ChannelRegistry, NotificationManager};
use argus_server::config::ServerConfig;
use argus_server::push::ConnectionManager;
use argus_server::state::AppState;
use argus_server::{app, pipeline, rule_seed};
use argus_storage::engine::SqliteTimeSeriesEngine;
use argus_storage::CatalogStore;
use argus_tools::ToolRegistry;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub async fn build_test_context() -> Result<TestContext> {
    build_test_context_with(ServerConfig::default()).await
}

pub async fn build_test_context_with(config: ServerConfig) -> Result<TestContext> {
    argus_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let store = Arc::new(SqliteTimeSeriesEngine::new(&temp_dir.path().join("telemetry"))?);
    let catalog = Arc::new(CatalogStore::new(temp_dir.path()).await?);
    rule_seed::seed_default_rules(&catalog).await?;

    let bus = EventBus::new();
    let budget = BudgetHandle::spawn(
        BudgetConfig {
            hourly_limit: config.budget.hourly_limit,
            daily_limit: config.budget.daily_limit,
        },
        bus.clone(),
    );

    let rules = catalog.list_alert_rules(Some(true)).await?;
    let alert_engine = Arc::new(Mutex::new(AlertEngine::new(rules)));
    let actions = ActionEngine::new(CommandSandbox::new(), catalog.clone(), bus.clone());

    let registry = ToolRegistry::new();
    argus_tools::builtin::register_builtin_tools(&registry, store.clone(), catalog.clone())
        .map_err(|e| anyhow::anyhow!(e))?;

    let notifier = Arc::new(NotificationManager::from_configs(
        &ChannelRegistry::default(),
        Vec::new(),
    ));

    let state = AppState {
        store,
        catalog,
        bus: bus.clone(),
        budget,
        alert_engine,
        actions,
        registry,
        react: None,
        investigator: None,
        connections: ConnectionManager::new(),
        notifier,
        ingest_inflight: Arc::new(AtomicUsize::new(0)),
        config: Arc::new(config),
        start_time: Utc::now(),
    };

    // The classifier → alert stages run like in production.
    pipeline::spawn_classifier(&state);
    pipeline::spawn_alert_pipeline(state.clone());

    let app = app::build_http_app(state.clone());
    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

pub async fn get(ctx: &TestContext, path: &str) -> (StatusCode, Value) {
    request(ctx, "GET", path, None, &[]).await
}

pub async fn post_json(ctx: &TestContext, path: &str, body: Value) -> (StatusCode, Value) {
    request(ctx, "POST", path, Some(body), &[]).await
}

pub async fn request(
    ctx: &TestContext,
    method: &str,
    path: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = ctx.app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Poll a listing endpoint until the predicate holds or the attempts run
/// out; background pipeline stages are asynchronous.
pub async fn wait_for<F>(ctx: &TestContext, path: &str, predicate: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    for _ in 0..100 {
        let (status, body) = get(ctx, path).await;
        if status == StatusCode::OK && predicate(&body) {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("condition never held for {path}");
}
