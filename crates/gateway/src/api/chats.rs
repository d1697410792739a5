//! `GET /v1/chats/:chat_id/messages` — read a chat's message history.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn messages(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    if !state.messages.exists(&chat_id) {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown chat" })),
        )
            .into_response();
    }

    let history = state.messages.history(&chat_id, q.limit);
    let chat_state = state.chat_state.get(&chat_id);
    let last_ts = history.last().map(|m| m.ts_ms);
    let count = history.len();

    Json(serde_json::json!({
        "chat_id": chat_id,
        "messages": history,
        "state": {
            "pending_run_id": chat_state.pending_run_id,
            "active_run_id": chat_state.active_run_id,
        },
        "meta": {
            "count": count,
            "last_ts": last_ts,
        },
    }))
    .into_response()
}
