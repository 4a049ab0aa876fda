pub mod alerts;
pub mod investigations;
pub mod pagination;
pub mod rules;
pub mod system;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Error body shared by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub detail: String,
}

pub fn error_response(status: StatusCode, detail: &str) -> Response {
    (
        status,
        Json(ApiError {
            detail: detail.to_string(),
        }),
    )
        .into_response()
}

/// Map a catalog/storage failure to a 500 without leaking internals.
pub fn storage_error(err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, "Storage error");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
}
