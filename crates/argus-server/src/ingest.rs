//! Telemetry ingestion endpoint: batch validation, partial acceptance,
//! store append + bus publish, and backpressure.

use crate::api::error_response;
use crate::state::AppState;
use argus_bus::BusMessage;
use argus_common::types::{
    DependencyPayload, Event, EventPayload, LogPayload, MetricPayload, ProcessPayload,
    SdkEventPayload, SecurityPayload, Severity, SpanPayload,
};
use argus_storage::{TelemetryRow, TimeSeriesStore};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::Ordering;
use utoipa::ToSchema;

pub const MAX_EVENTS_PER_BATCH: usize = 1000;

/// In-flight append batches above which ingest returns 429.
pub const WRITE_HIGH_WATER: usize = 64;

const RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestBatch {
    pub events: Vec<IngestEvent>,
    /// SDK identifier, e.g. "argus-python/0.3.0".
    #[serde(default)]
    pub sdk: String,
    #[serde(default)]
    pub service: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RejectedEvent {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: Vec<RejectedEvent>,
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Validate one raw event against its kind schema and build the typed
/// payload. Unknown types fail closed.
fn build_payload(event_type: &str, data: &Value) -> Result<EventPayload, String> {
    match event_type {
        "metric" => {
            let name = str_field(data, "name").ok_or("metric requires data.name")?;
            let value = data
                .get("value")
                .and_then(|v| v.as_f64())
                .ok_or("metric requires numeric data.value")?;
            let labels = data
                .get("labels")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            Ok(EventPayload::Metric(MetricPayload {
                name,
                value,
                labels,
            }))
        }
        "log" => {
            let text = str_field(data, "message")
                .or_else(|| str_field(data, "text"))
                .ok_or("log requires data.message")?;
            Ok(EventPayload::Log(LogPayload {
                file: str_field(data, "file").unwrap_or_default(),
                line_offset: data.get("line_offset").and_then(|v| v.as_i64()).unwrap_or(0),
                level: str_field(data, "level").unwrap_or_else(|| "info".to_string()),
                text,
            }))
        }
        "span" => {
            let payload: SpanPayload = serde_json::from_value(data.clone())
                .map_err(|e| format!("invalid span payload: {e}"))?;
            if payload.trace_id.is_empty() || payload.span_id.is_empty() {
                return Err("span requires trace_id and span_id".to_string());
            }
            Ok(EventPayload::Span(payload))
        }
        "dependency" => {
            let payload: DependencyPayload = serde_json::from_value(data.clone())
                .map_err(|e| format!("invalid dependency payload: {e}"))?;
            if payload.target.is_empty() {
                return Err("dependency requires target".to_string());
            }
            Ok(EventPayload::Dependency(payload))
        }
        "process" => {
            let payload: ProcessPayload = serde_json::from_value(data.clone())
                .map_err(|e| format!("invalid process payload: {e}"))?;
            Ok(EventPayload::Process(payload))
        }
        "security_finding" | "security-finding" => {
            let payload: SecurityPayload = serde_json::from_value(data.clone())
                .map_err(|e| format!("invalid security payload: {e}"))?;
            Ok(EventPayload::SecurityFinding(payload))
        }
        "exception" | "event" | "deploy" | "runtime_metric" | "trace_start" | "trace_end" => {
            Ok(EventPayload::SdkEvent(SdkEventPayload {
                event_type: event_type.to_string(),
                data: data.clone(),
            }))
        }
        other => Err(format!("unknown event type: {other}")),
    }
}

fn summary_message(service: &str, payload: &EventPayload) -> String {
    match payload {
        EventPayload::Metric(m) => format!("{} at {:.1} on {service}", m.name, m.value),
        EventPayload::Log(l) => l.text.clone(),
        EventPayload::SdkEvent(e) if e.event_type == "exception" => {
            let message = e
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            format!("Exception from {service}: {message}")
        }
        EventPayload::Process(p) => format!("Process {} ({}) {}", p.name, p.pid, p.state),
        EventPayload::SecurityFinding(s) => format!("Security check {} {}", s.check, s.status),
        _ => String::new(),
    }
}

fn build_event(raw: &IngestEvent, default_service: &str, received_at: DateTime<Utc>) -> Result<Event, String> {
    let service = if raw.service.is_empty() {
        default_service.to_string()
    } else {
        raw.service.clone()
    };
    if service.is_empty() {
        return Err("missing service".to_string());
    }
    let payload = build_payload(&raw.event_type, &raw.data)?;
    let message = summary_message(&service, &payload);
    Ok(Event {
        id: argus_common::id::next_id(),
        timestamp: raw.timestamp.unwrap_or(received_at),
        source: service,
        severity: Severity::Info,
        message,
        payload,
    })
}

/// `POST /ingest`: receive a telemetry batch. Partial acceptance: bad
/// events are reported per-index, the rest land atomically.
#[utoipa::path(
    post,
    path = "/ingest",
    tag = "Ingest",
    request_body = IngestBatch,
    responses(
        (status = 200, description = "Batch processed (possibly partially)", body = IngestResponse),
        (status = 400, description = "Batch too large", body = crate::api::ApiError),
        (status = 401, description = "Missing or invalid API key", body = crate::api::ApiError),
        (status = 429, description = "Store saturated, retry later", body = crate::api::ApiError)
    )
)]
pub async fn ingest(State(state): State<AppState>, Json(batch): Json<IngestBatch>) -> Response {
    if batch.events.len() > MAX_EVENTS_PER_BATCH {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!(
                "batch too large: {} events (max {MAX_EVENTS_PER_BATCH})",
                batch.events.len()
            ),
        );
    }

    // Backpressure: too many append batches already in flight.
    if state.ingest_inflight.load(Ordering::Relaxed) >= WRITE_HIGH_WATER {
        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "ingestion backpressure, retry later",
        );
        response.headers_mut().insert(
            header::RETRY_AFTER,
            header::HeaderValue::from(RETRY_AFTER_SECS),
        );
        return response;
    }

    let received_at = Utc::now();
    let mut accepted: Vec<Event> = Vec::with_capacity(batch.events.len());
    let mut rejected: Vec<RejectedEvent> = Vec::new();
    for (index, raw) in batch.events.iter().enumerate() {
        match build_event(raw, &batch.service, received_at) {
            Ok(event) => accepted.push(event),
            Err(error) => rejected.push(RejectedEvent { index, error }),
        }
    }

    if !accepted.is_empty() {
        let rows: Vec<TelemetryRow> = accepted
            .iter()
            .filter_map(TelemetryRow::from_event)
            .collect();

        state.ingest_inflight.fetch_add(1, Ordering::Relaxed);
        let store = state.store.clone();
        let append = tokio::task::spawn_blocking(move || store.append(&rows)).await;
        state.ingest_inflight.fetch_sub(1, Ordering::Relaxed);

        match append {
            Ok(Ok(())) => {
                // Publish only after the durable append so subscribers
                // never observe events the store could still reject.
                for event in &accepted {
                    state.bus.publish(BusMessage::TelemetryRaw(event.clone()));
                }
            }
            Ok(Err(err)) => {
                tracing::error!(error = %err, "Failed to append ingest batch");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage error");
            }
            Err(err) => {
                tracing::error!(error = %err, "Ingest append task failed");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage error");
            }
        }
    }

    tracing::debug!(
        accepted = accepted.len(),
        rejected = rejected.len(),
        sdk = %batch.sdk,
        "Ingested telemetry batch"
    );
    (
        StatusCode::OK,
        Json(IngestResponse {
            accepted: accepted.len(),
            rejected,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_payload_requires_name_and_value() {
        assert!(build_payload("metric", &serde_json::json!({"name": "cpu_percent", "value": 97})).is_ok());
        assert!(build_payload("metric", &serde_json::json!({"value": 97})).is_err());
        assert!(build_payload("metric", &serde_json::json!({"name": "cpu_percent"})).is_err());
    }

    #[test]
    fn unknown_types_fail_closed() {
        assert!(build_payload("yolo", &serde_json::json!({})).is_err());
    }

    #[test]
    fn event_requires_a_service() {
        let raw = IngestEvent {
            event_type: "metric".to_string(),
            service: String::new(),
            data: serde_json::json!({"name": "cpu_percent", "value": 1.0}),
            timestamp: None,
        };
        assert!(build_event(&raw, "", Utc::now()).is_err());
        assert!(build_event(&raw, "fallback-svc", Utc::now()).is_ok());
    }
}
