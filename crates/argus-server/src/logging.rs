use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Per-request correlation id, available to handlers via request
/// extensions and echoed in the `X-Trace-Id` response header.
#[derive(Debug, Clone, Default)]
pub struct TraceId(pub String);

/// Generate a 16-character hex trace ID (8 random bytes).
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Request/response logging middleware with trace-id propagation.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // Swagger UI assets are noise.
    if path.starts_with("/docs") {
        return next.run(req).await;
    }

    req.extensions_mut().insert(TraceId(trace_id.clone()));
    let start = Instant::now();

    let mut response = next.run(req).await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status();
    if status.is_server_error() {
        tracing::error!(trace_id = %trace_id, %method, %path, %status, elapsed_ms, "request");
    } else if status.is_client_error() {
        tracing::warn!(trace_id = %trace_id, %method, %path, %status, elapsed_ms, "request");
    } else {
        tracing::info!(trace_id = %trace_id, %method, %path, %status, elapsed_ms, "request");
    }

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", value);
    }
    response
}
