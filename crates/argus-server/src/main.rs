use anyhow::Result;
use argus_actions::{ActionEngine, CommandSandbox, RunCommandTool};
use argus_agent::{Investigator, ReactLoop};
use argus_alert::AlertEngine;
use argus_budget::{BudgetConfig, BudgetHandle};
use argus_bus::EventBus;
use argus_llm::LlmSettings;
use argus_notify::manager::ChannelConfig;
use argus_notify::{ChannelRegistry, NotificationManager};
use argus_server::config::ServerConfig;
use argus_server::push::ConnectionManager;
use argus_server::state::AppState;
use argus_server::{app, pipeline, push, retention, rule_seed};
use argus_storage::engine::SqliteTimeSeriesEngine;
use argus_storage::CatalogStore;
use argus_tools::ToolRegistry;
use chrono::Utc;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    argus_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("argus=info".parse()?))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "argus.toml".to_string());
    let config = Arc::new(ServerConfig::load(Path::new(&config_path))?);

    let data_dir = Path::new(&config.storage.data_dir);
    let store = Arc::new(SqliteTimeSeriesEngine::new(&data_dir.join("telemetry"))?);
    let catalog = Arc::new(CatalogStore::new(data_dir).await?);

    let seeded = rule_seed::seed_default_rules(&catalog).await?;
    if seeded > 0 {
        tracing::info!(seeded, "First start: default rules installed");
    }

    let bus = EventBus::new();
    let budget = BudgetHandle::spawn(
        BudgetConfig {
            hourly_limit: config.budget.hourly_limit,
            daily_limit: config.budget.daily_limit,
        },
        bus.clone(),
    );

    let rules = catalog.list_alert_rules(Some(true)).await?;
    tracing::info!(rules = rules.len(), "Alert engine starting");
    let alert_engine = Arc::new(Mutex::new(AlertEngine::new(rules)));

    let actions = ActionEngine::new(CommandSandbox::new(), catalog.clone(), bus.clone());

    let registry = ToolRegistry::new();
    argus_tools::builtin::register_builtin_tools(&registry, store.clone(), catalog.clone())
        .map_err(|e| anyhow::anyhow!(e))?;
    registry
        .register(Arc::new(RunCommandTool::new(actions.clone())))
        .map_err(|e| anyhow::anyhow!(e))?;

    // LLM surfaces degrade gracefully when no key is configured.
    let react = if config.llm.api_key.is_empty() {
        tracing::warn!("llm.api_key not set; chat and auto-investigation disabled");
        None
    } else {
        let provider = argus_llm::build_provider(&LlmSettings {
            provider: config.llm.provider.clone(),
            model: config.llm.model.clone(),
            api_key: config.llm.api_key.clone(),
            base_url: config.llm.base_url.clone(),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
            timeout_secs: 120,
        })?;
        tracing::info!(
            provider = %config.llm.provider,
            model = %config.llm.model,
            "LLM provider configured"
        );
        Some(Arc::new(ReactLoop::new(
            provider,
            registry.clone(),
            budget.clone(),
            bus.clone(),
        )))
    };

    let investigator = react.as_ref().map(|react| {
        Investigator::spawn(react.clone(), catalog.clone(), bus.clone(), budget.clone())
    });

    let channel_registry = ChannelRegistry::default();
    let channel_configs: Vec<ChannelConfig> = config
        .notification
        .channels
        .iter()
        .map(|c| ChannelConfig {
            id: c.id.clone(),
            channel_type: c.channel_type.clone(),
            min_severity: c.min_severity.parse().unwrap_or(argus_common::types::Severity::Notable),
            config: serde_json::json!({
                "url": c.url,
                "body_template": c.body_template,
            }),
        })
        .collect();
    let notifier = Arc::new(NotificationManager::from_configs(
        &channel_registry,
        channel_configs,
    ));

    let state = AppState {
        store: store.clone(),
        catalog,
        bus: bus.clone(),
        budget,
        alert_engine,
        actions,
        registry,
        react,
        investigator,
        connections: ConnectionManager::new(),
        notifier,
        ingest_inflight: Arc::new(AtomicUsize::new(0)),
        config: config.clone(),
        start_time: Utc::now(),
    };

    // Background stages.
    pipeline::spawn_classifier(&state);
    pipeline::spawn_alert_pipeline(state.clone());
    pipeline::spawn_status_ticker(state.clone());
    push::spawn_fanout(&bus, state.connections.clone());
    retention::spawn_retention(store, config.storage.retention_days);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Argus agent server listening");

    axum::serve(listener, app::build_http_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
