use crate::config::ServerConfig;
use crate::push::ConnectionManager;
use argus_actions::ActionEngine;
use argus_agent::{Investigator, ReactLoop};
use argus_alert::AlertEngine;
use argus_budget::BudgetHandle;
use argus_bus::EventBus;
use argus_notify::NotificationManager;
use argus_storage::engine::SqliteTimeSeriesEngine;
use argus_storage::CatalogStore;
use argus_tools::ToolRegistry;
use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

/// Shared application state. Everything here is either immutable, its own
/// synchronization domain (bus, budget actor, action engine), or guarded
/// by the one mutex around the alert engine.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteTimeSeriesEngine>,
    pub catalog: Arc<CatalogStore>,
    pub bus: EventBus,
    pub budget: BudgetHandle,
    pub alert_engine: Arc<Mutex<AlertEngine>>,
    pub actions: ActionEngine,
    pub registry: ToolRegistry,
    /// None when no LLM provider is configured; chat degrades gracefully.
    pub react: Option<Arc<ReactLoop>>,
    pub investigator: Option<Investigator>,
    pub connections: ConnectionManager,
    pub notifier: Arc<NotificationManager>,
    pub ingest_inflight: Arc<AtomicUsize>,
    pub config: Arc<ServerConfig>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    /// System snapshot for `GET /status` and the `system_status` push.
    pub fn status_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": (Utc::now() - self.start_time).num_seconds(),
            "connections": self.connections.len(),
            "llm_configured": self.react.is_some(),
            "pending_actions": self.actions.pending_count(),
            "version": env!("CARGO_PKG_VERSION"),
        })
    }
}
