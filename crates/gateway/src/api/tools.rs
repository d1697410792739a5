//! `GET /v1/tools` — read-only snapshot of the registered tool-server catalog.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tools: Vec<_> = state.tool_registry.all().collect();
    Json(serde_json::json!({ "tools": tools }))
}
