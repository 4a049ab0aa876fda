use crate::api::pagination::{paginated, PageParams, Paginated, PAGE_SIZE};
use crate::api::storage_error;
use crate::state::AppState;
use argus_storage::InvestigationRow;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Serialize, ToSchema)]
pub struct InvestigationResponse {
    pub id: String,
    pub alert_id: String,
    pub trigger: String,
    pub status: String,
    pub summary: String,
    pub tokens_used: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<InvestigationRow> for InvestigationResponse {
    fn from(row: InvestigationRow) -> Self {
        Self {
            id: row.id,
            alert_id: row.alert_id,
            trigger: row.trigger,
            status: row.status,
            summary: row.summary,
            tokens_used: row.tokens_used,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

/// List investigations, newest first.
#[utoipa::path(
    get,
    path = "/investigations",
    tag = "Investigations",
    params(PageParams),
    responses(
        (status = 200, description = "Paginated investigations", body = Paginated<InvestigationResponse>)
    )
)]
async fn list_investigations(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Response {
    let total = match state.catalog.count_investigations().await {
        Ok(total) => total,
        Err(err) => return storage_error(err),
    };
    match state
        .catalog
        .list_investigations(PAGE_SIZE, page.offset())
        .await
    {
        Ok(rows) => {
            let items: Vec<InvestigationResponse> = rows.into_iter().map(Into::into).collect();
            Json(paginated(items, total, page.page())).into_response()
        }
        Err(err) => storage_error(err),
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(list_investigations))
}
