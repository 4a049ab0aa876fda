use crate::api::pagination::{paginated, PageParams, Paginated, PAGE_SIZE};
use crate::api::{error_response, storage_error};
use crate::state::AppState;
use argus_bus::BusMessage;
use argus_common::error::CoreError;
use argus_common::types::{AlertStatus, Severity};
use argus_storage::{AlertFilter, AlertRow};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Serialize, ToSchema)]
pub struct AlertResponse {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: String,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub investigation_id: Option<String>,
}

impl From<AlertRow> for AlertResponse {
    fn from(row: AlertRow) -> Self {
        Self {
            id: row.id,
            rule_id: row.rule_id,
            rule_name: row.rule_name,
            severity: row.severity.to_string(),
            title: row.title,
            summary: row.summary,
            source: row.source,
            status: row.status.to_string(),
            timestamp: row.timestamp,
            acknowledged_at: row.acknowledged_at,
            acknowledged_by: row.acknowledged_by,
            resolved_at: row.resolved_at,
            investigation_id: row.investigation_id,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListAlertsParams {
    /// active | acknowledged | resolved
    status: Option<String>,
    /// INFO | NOTABLE | URGENT
    severity: Option<String>,
    page: Option<u64>,
}

/// List alerts, newest first.
#[utoipa::path(
    get,
    path = "/alerts",
    tag = "Alerts",
    params(ListAlertsParams),
    responses(
        (status = 200, description = "Paginated alerts", body = Paginated<AlertResponse>),
        (status = 400, description = "Bad filter value", body = crate::api::ApiError)
    )
)]
async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListAlertsParams>,
) -> Response {
    let status = match params.status.as_deref().map(str::parse::<AlertStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(err)) => return error_response(StatusCode::BAD_REQUEST, &err),
    };
    let severity = match params.severity.as_deref().map(str::parse::<Severity>) {
        None => None,
        Some(Ok(severity)) => Some(severity),
        Some(Err(err)) => return error_response(StatusCode::BAD_REQUEST, &err),
    };
    let filter = AlertFilter { status, severity };
    let page = PageParams { page: params.page };

    let total = match state.catalog.count_alerts(&filter).await {
        Ok(total) => total,
        Err(err) => return storage_error(err),
    };
    match state
        .catalog
        .list_alerts(&filter, PAGE_SIZE, page.offset())
        .await
    {
        Ok(rows) => {
            let items: Vec<AlertResponse> = rows.into_iter().map(Into::into).collect();
            Json(paginated(items, total, page.page())).into_response()
        }
        Err(err) => storage_error(err),
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
struct AcknowledgeBody {
    /// Operator identity recorded on the alert.
    #[serde(default)]
    by: String,
}

/// Acknowledge an alert. Idempotent; forbidden once resolved.
#[utoipa::path(
    post,
    path = "/alerts/{id}/acknowledge",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id")),
    request_body(content = AcknowledgeBody),
    responses(
        (status = 200, description = "Acknowledged alert", body = AlertResponse),
        (status = 404, description = "No such alert", body = crate::api::ApiError),
        (status = 409, description = "Alert already resolved", body = crate::api::ApiError)
    )
)]
async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AcknowledgeBody>,
) -> Response {
    let by = if body.by.is_empty() {
        "operator".to_string()
    } else {
        body.by
    };
    let now = Utc::now();

    let engine_result = {
        let mut engine = state
            .alert_engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        engine.acknowledge(&id, &by, now)
    };

    match engine_result {
        Ok(alert) => {
            if let Err(err) = state
                .catalog
                .update_alert_status(&id, AlertStatus::Acknowledged, Some(&by))
                .await
            {
                return storage_error(err);
            }
            state.bus.publish(BusMessage::AlertStateChanged {
                alert_id: id,
                status: AlertStatus::Acknowledged,
                by,
            });
            Json(AlertResponse::from(AlertRow::from(&alert))).into_response()
        }
        Err(CoreError::Conflict(detail)) => error_response(StatusCode::CONFLICT, &detail),
        // Alerts fired before a restart live only in the catalog.
        Err(CoreError::NotFound { .. }) => {
            acknowledge_from_catalog(&state, &id, &by).await
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn acknowledge_from_catalog(state: &AppState, id: &str, by: &str) -> Response {
    match state.catalog.get_alert(id).await {
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no such alert"),
        Ok(Some(row)) if row.status == AlertStatus::Resolved => {
            error_response(StatusCode::CONFLICT, "cannot acknowledge a resolved alert")
        }
        Ok(Some(_)) => match state
            .catalog
            .update_alert_status(id, AlertStatus::Acknowledged, Some(by))
            .await
        {
            Ok(Some(row)) => {
                state.bus.publish(BusMessage::AlertStateChanged {
                    alert_id: id.to_string(),
                    status: AlertStatus::Acknowledged,
                    by: by.to_string(),
                });
                Json(AlertResponse::from(row)).into_response()
            }
            Ok(None) => error_response(StatusCode::NOT_FOUND, "no such alert"),
            Err(err) => storage_error(err),
        },
        Err(err) => storage_error(err),
    }
}

/// Resolve an alert. Cancels any in-flight auto-investigation for it.
#[utoipa::path(
    post,
    path = "/alerts/{id}/resolve",
    tag = "Alerts",
    params(("id" = String, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Resolved alert", body = AlertResponse),
        (status = 404, description = "No such alert", body = crate::api::ApiError)
    )
)]
async fn resolve_alert(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let now = Utc::now();
    let engine_result = {
        let mut engine = state
            .alert_engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        engine.resolve(&id, now)
    };

    match engine_result {
        Ok((alert, in_flight_investigation)) => {
            if in_flight_investigation.is_some() {
                if let Some(investigator) = &state.investigator {
                    investigator.cancel_for_alert(&alert.id);
                }
            }
            if let Err(err) = state
                .catalog
                .update_alert_status(&id, AlertStatus::Resolved, None)
                .await
            {
                return storage_error(err);
            }
            state.bus.publish(BusMessage::AlertStateChanged {
                alert_id: id,
                status: AlertStatus::Resolved,
                by: String::new(),
            });
            Json(AlertResponse::from(AlertRow::from(&alert))).into_response()
        }
        Err(CoreError::NotFound { .. }) => match state.catalog.get_alert(&id).await {
            Ok(None) => error_response(StatusCode::NOT_FOUND, "no such alert"),
            Ok(Some(_)) => match state
                .catalog
                .update_alert_status(&id, AlertStatus::Resolved, None)
                .await
            {
                Ok(Some(row)) => {
                    state.bus.publish(BusMessage::AlertStateChanged {
                        alert_id: id,
                        status: AlertStatus::Resolved,
                        by: String::new(),
                    });
                    Json(AlertResponse::from(row)).into_response()
                }
                Ok(None) => error_response(StatusCode::NOT_FOUND, "no such alert"),
                Err(err) => storage_error(err),
            },
            Err(err) => storage_error(err),
        },
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_alerts))
        .routes(routes!(acknowledge_alert))
        .routes(routes!(resolve_alert))
}
