//! HTTP server for the dashboard.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::info;

use glassbox::{RunDetail, RunId, RunRecord, Store, StoreError};

const RUN_LIST_LIMIT: u32 = 50;

/// Store errors rendered as HTTP responses.
struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

/// Create the dashboard router over the given store.
pub fn create_router(store: Arc<dyn Store>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/:id", get(get_run))
        .with_state(store)
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

async fn list_runs(
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<Vec<RunRecord>>, ApiError> {
    let runs = store.list_runs(RUN_LIST_LIMIT).await?;
    Ok(Json(runs))
}

async fn get_run(
    State(store): State<Arc<dyn Store>>,
    Path(id): Path<String>,
) -> Result<Json<RunDetail>, ApiError> {
    // An unparseable id cannot name any run, so it reads as not found too.
    let not_found = || ApiError(StoreError::NotFound(format!("run {id} not found")));
    let run_id: RunId = id.parse().map_err(|_| not_found())?;
    let detail = store.get_run(run_id).await?.ok_or_else(not_found)?;
    Ok(Json(detail))
}

/// Bind the dashboard on the given port and serve until the process exits.
pub async fn serve(store: Arc<dyn Store>, port: u16) -> anyhow::Result<()> {
    let app = create_router(store);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("dashboard listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
