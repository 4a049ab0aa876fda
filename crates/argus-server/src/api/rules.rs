use crate::api::{error_response, storage_error};
use crate::state::AppState;
use argus_storage::AlertRuleRow;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Serialize, ToSchema)]
pub struct RuleResponse {
    pub id: String,
    pub name: String,
    pub event_kinds: Vec<String>,
    pub signal: Option<String>,
    pub min_severity: String,
    pub max_severity: Option<String>,
    pub cooldown_secs: i64,
    pub auto_investigate: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub channel: String,
    pub enabled: bool,
}

impl From<AlertRuleRow> for RuleResponse {
    fn from(row: AlertRuleRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            event_kinds: row.event_kinds.iter().map(|k| k.to_string()).collect(),
            signal: row.signal,
            min_severity: row.min_severity.to_string(),
            max_severity: row.max_severity.map(|s| s.to_string()),
            cooldown_secs: row.cooldown_secs,
            auto_investigate: row.auto_investigate,
            muted_until: row.muted_until,
            channel: row.channel,
            enabled: row.enabled,
        }
    }
}

/// List all alert rules.
#[utoipa::path(
    get,
    path = "/rules",
    tag = "Rules",
    responses((status = 200, description = "Alert rules", body = Vec<RuleResponse>))
)]
async fn list_rules(State(state): State<AppState>) -> Response {
    // The engine cache is authoritative for mute state.
    let rules: Vec<RuleResponse> = {
        let engine = state
            .alert_engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        engine.rules().iter().cloned().map(Into::into).collect()
    };
    Json(rules).into_response()
}

#[derive(Debug, Deserialize, ToSchema)]
struct MuteBody {
    duration_hours: f64,
}

#[derive(Debug, Serialize, ToSchema)]
struct MuteResponse {
    id: String,
    muted_until: DateTime<Utc>,
}

/// Mute a rule. Repeated mutes extend to `max(now + d, previous expiry)`.
#[utoipa::path(
    post,
    path = "/rules/{id}/mute",
    tag = "Rules",
    params(("id" = String, Path, description = "Rule id")),
    request_body = MuteBody,
    responses(
        (status = 200, description = "Mute expiry", body = MuteResponse),
        (status = 400, description = "Bad duration", body = crate::api::ApiError),
        (status = 404, description = "No such rule", body = crate::api::ApiError)
    )
)]
async fn mute_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MuteBody>,
) -> Response {
    if !body.duration_hours.is_finite() || body.duration_hours <= 0.0 {
        return error_response(StatusCode::BAD_REQUEST, "duration_hours must be positive");
    }
    let duration = Duration::seconds((body.duration_hours * 3600.0) as i64);
    let now = Utc::now();

    let muted_until = {
        let mut engine = state
            .alert_engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        engine.mute_rule(&id, duration, now)
    };
    let Some(muted_until) = muted_until else {
        return error_response(StatusCode::NOT_FOUND, "no such rule");
    };

    match state
        .catalog
        .set_rule_muted_until(&id, Some(muted_until))
        .await
    {
        Ok(Some(_)) => Json(MuteResponse { id, muted_until }).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no such rule"),
        Err(err) => storage_error(err),
    }
}

/// Unmute a rule.
#[utoipa::path(
    post,
    path = "/rules/{id}/unmute",
    tag = "Rules",
    params(("id" = String, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule unmuted", body = RuleResponse),
        (status = 404, description = "No such rule", body = crate::api::ApiError)
    )
)]
async fn unmute_rule(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let known = {
        let mut engine = state
            .alert_engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        engine.unmute_rule(&id)
    };
    if !known {
        return error_response(StatusCode::NOT_FOUND, "no such rule");
    }
    match state.catalog.set_rule_muted_until(&id, None).await {
        Ok(Some(row)) => Json(RuleResponse::from(row)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no such rule"),
        Err(err) => storage_error(err),
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_rules))
        .routes(routes!(mute_rule))
        .routes(routes!(unmute_rule))
}
