use crate::state::AppState;
use crate::{api, ingest, logging, middleware, ws};
use axum::http::HeaderValue;
use axum::middleware as axum_middleware;
use axum::routing::{any, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Argus Agent Server",
        description = "AI-native observability platform: telemetry ingestion, alerting, \
                       and the agent push protocol",
    ),
    tags(
        (name = "Ingest", description = "Telemetry ingestion"),
        (name = "Alerts", description = "Alert lifecycle"),
        (name = "Rules", description = "Alert rules and muting"),
        (name = "Investigations", description = "Auto-investigation history"),
        (name = "System", description = "Budget, logs, security, status, settings, audit")
    )
)]
struct ApiDoc;

pub fn build_http_app(state: AppState) -> Router {
    let (catalog_router, catalog_spec) = OpenApiRouter::new()
        .merge(api::alerts::routes())
        .merge(api::rules::routes())
        .merge(api::investigations::routes())
        .merge(api::system::routes())
        .split_for_parts();

    let mut spec = ApiDoc::openapi();
    spec.merge(catalog_spec);

    let cors = if state.config.cors.origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors
            .origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let ingest_router = Router::new()
        .route("/ingest", post(ingest::ingest))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::ingest_key_middleware,
        ));

    catalog_router
        .merge(ingest_router)
        .route("/ws", any(ws::ws_handler))
        .fallback(api::system::not_found)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", spec))
        .layer(cors)
        .layer(axum_middleware::from_fn(logging::request_logging))
}

pub fn openapi_spec() -> Arc<utoipa::openapi::OpenApi> {
    Arc::new(ApiDoc::openapi())
}
