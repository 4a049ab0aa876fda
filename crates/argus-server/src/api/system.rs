use crate::api::pagination::{paginated, PageParams, Paginated, PAGE_SIZE};
use crate::api::{error_response, storage_error};
use crate::state::AppState;
use argus_common::types::BudgetSnapshot;
use argus_storage::{AuditRow, TableKind, TelemetryQuery, TelemetryRow, TimeSeriesStore};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Current budget counters.
#[utoipa::path(
    get,
    path = "/budget",
    tag = "System",
    responses((status = 200, description = "Budget snapshot", body = BudgetSnapshotResponse))
)]
async fn get_budget(State(state): State<AppState>) -> Response {
    let snapshot = state.budget.status().await;
    Json(BudgetSnapshotResponse::from(snapshot)).into_response()
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BudgetSnapshotResponse {
    pub hourly_used: u64,
    pub hourly_limit: u64,
    pub hourly_pct: f64,
    pub daily_used: u64,
    pub daily_limit: u64,
    pub daily_pct: f64,
    pub total_tokens: u64,
    pub total_requests: u64,
}

impl From<BudgetSnapshot> for BudgetSnapshotResponse {
    fn from(s: BudgetSnapshot) -> Self {
        Self {
            hourly_used: s.hourly_used,
            hourly_limit: s.hourly_limit,
            hourly_pct: s.hourly_pct,
            daily_used: s.daily_used,
            daily_limit: s.daily_limit,
            daily_pct: s.daily_pct,
            total_tokens: s.total_tokens,
            total_requests: s.total_requests,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct LogsParams {
    /// Exact log level filter, e.g. error.
    severity: Option<String>,
    /// Maximum rows (default 100, max 500).
    limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogLineResponse {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub file: String,
    pub level: String,
    pub message: String,
}

/// Recent log lines from the index (last 24 h), newest first.
#[utoipa::path(
    get,
    path = "/logs",
    tag = "System",
    params(LogsParams),
    responses((status = 200, description = "Recent log lines", body = Vec<LogLineResponse>))
)]
async fn get_logs(State(state): State<AppState>, Query(params): Query<LogsParams>) -> Response {
    let now = Utc::now();
    let mut query = TelemetryQuery::new(TableKind::LogIndex, now - Duration::hours(24), now);
    query.level = params.severity;
    query.limit = params.limit.unwrap_or(100).min(500);
    query.order_desc = true;

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.query(&query)).await;
    match result {
        Ok(Ok(result)) => {
            let lines: Vec<LogLineResponse> = result
                .rows
                .into_iter()
                .filter_map(|row| match row {
                    TelemetryRow::Log(l) => Some(LogLineResponse {
                        timestamp: l.timestamp,
                        service: l.service,
                        file: l.file,
                        level: l.level,
                        message: l.message,
                    }),
                    _ => None,
                })
                .collect();
            Json(lines).into_response()
        }
        Ok(Err(err)) => storage_error(err),
        Err(err) => storage_error(err),
    }
}

/// Recent security findings (last 24 h), newest first.
#[utoipa::path(
    get,
    path = "/security",
    tag = "System",
    responses((status = 200, description = "Recent security findings"))
)]
async fn get_security(State(state): State<AppState>) -> Response {
    let now = Utc::now();
    let mut query = TelemetryQuery::new(TableKind::SdkEvents, now - Duration::hours(24), now);
    query.name = Some("security_finding".to_string());
    query.limit = 200;
    query.order_desc = true;

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.query(&query)).await;
    match result {
        Ok(Ok(result)) => Json(serde_json::json!({
            "findings": result.rows,
            "truncated": result.truncated,
        }))
        .into_response(),
        Ok(Err(err)) => storage_error(err),
        Err(err) => storage_error(err),
    }
}

/// Server status snapshot.
#[utoipa::path(
    get,
    path = "/status",
    tag = "System",
    responses((status = 200, description = "Status snapshot"))
)]
async fn get_status(State(state): State<AppState>) -> Response {
    Json(state.status_snapshot()).into_response()
}

/// Effective settings, with secrets masked.
#[utoipa::path(
    get,
    path = "/settings",
    tag = "System",
    responses((status = 200, description = "Effective settings"))
)]
async fn get_settings(State(state): State<AppState>) -> Response {
    let overrides = match state.catalog.list_configs().await {
        Ok(rows) => rows,
        Err(err) => return storage_error(err),
    };
    let overrides: serde_json::Map<String, serde_json::Value> = overrides
        .into_iter()
        .map(|row| (row.key, serde_json::Value::String(row.value)))
        .collect();

    let config = &state.config;
    Json(serde_json::json!({
        "llm.provider": config.llm.provider,
        "llm.model": config.llm.model,
        "llm.api_key": mask(&config.llm.api_key),
        "budget.hourly_limit": config.budget.hourly_limit,
        "budget.daily_limit": config.budget.daily_limit,
        "server.host": config.server.host,
        "server.port": config.server.port,
        "storage.data_dir": config.storage.data_dir,
        "storage.retention_days": config.storage.retention_days,
        "collectors.metrics_interval_s": config.collectors.metrics_interval_s,
        "collectors.log_paths": config.collectors.log_paths,
        "cors.origins": config.cors.origins,
        "public_url": config.public_url,
        "overrides": overrides,
    }))
    .into_response()
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else if secret.len() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", &secret[..4])
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditResponse {
    pub seq: i64,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub command: String,
    pub result: String,
    pub success: bool,
    pub user_approved: bool,
    pub conversation_id: String,
}

impl From<AuditRow> for AuditResponse {
    fn from(row: AuditRow) -> Self {
        Self {
            seq: row.seq,
            timestamp: row.timestamp,
            action: row.action,
            command: row.command,
            result: row.result,
            success: row.success,
            user_approved: row.user_approved,
            conversation_id: row.conversation_id,
        }
    }
}

/// Action audit trail, newest first.
#[utoipa::path(
    get,
    path = "/audit",
    tag = "System",
    params(PageParams),
    responses((status = 200, description = "Paginated audit entries", body = Paginated<AuditResponse>))
)]
async fn get_audit(State(state): State<AppState>, Query(page): Query<PageParams>) -> Response {
    let total = match state.catalog.count_audit().await {
        Ok(total) => total,
        Err(err) => return storage_error(err),
    };
    match state.catalog.list_audit(PAGE_SIZE, page.offset()).await {
        Ok(rows) => {
            let items: Vec<AuditResponse> = rows.into_iter().map(Into::into).collect();
            Json(paginated(items, total, page.page())).into_response()
        }
        Err(err) => storage_error(err),
    }
}

/// 404 for unknown catalog ids, shared shape with every other error.
pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_budget))
        .routes(routes!(get_logs))
        .routes(routes!(get_security))
        .routes(routes!(get_status))
        .routes(routes!(get_settings))
        .routes(routes!(get_audit))
}
