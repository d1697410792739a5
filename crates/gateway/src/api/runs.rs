//! Run inspection and handoff API endpoints.
//!
//! - `GET /v1/runs/:run_id`       — snapshot of a plan run's lifecycle state
//! - `POST /v1/runs/:run_id/start` — idempotent draft -> queued handoff

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::runtime::send_pipeline;
use crate::state::AppState;

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    match state.run_store.get(&run_id) {
        Some(run) => Json(serde_json::json!(run)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "run not found" })),
        )
            .into_response(),
    }
}

pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    let reply = send_pipeline::start_run(&state, &run_id).await;
    Json(serde_json::json!({
        "reply": reply.reply,
        "run_id": reply.run_id,
        "status": reply.status,
    }))
}
