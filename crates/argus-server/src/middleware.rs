use crate::api::error_response;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing;

static ARGUS_KEY_HEADER: HeaderName = HeaderName::from_static("x-argus-key");

/// Validates the opaque `x-argus-key` header on ingest requests.
///
/// When no key is configured, all requests pass. Comparison is
/// constant-time over the byte length to avoid a trivial timing oracle.
pub async fn ingest_key_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected = &state.config.server.api_key;
    if expected.is_empty() {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(&ARGUS_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        tracing::warn!("Ingest request rejected: missing or invalid x-argus-key");
        return error_response(StatusCode::UNAUTHORIZED, "missing or invalid API key");
    }
    next.run(req).await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::constant_time_eq;

    #[test]
    fn equality_check() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
    }
}
