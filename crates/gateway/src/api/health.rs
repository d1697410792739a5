//! `GET /v1/health` — liveness probe.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let providers: Vec<&str> = state.llm.provider_ids().collect();
    Json(serde_json::json!({
        "status": "ok",
        "llm_providers": providers,
        "reasoner_available": state.reasoner.is_some(),
    }))
}
