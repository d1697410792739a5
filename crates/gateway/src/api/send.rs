//! `POST /v1/send` — the single entry point a chat message flows through.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::runtime::send_pipeline;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub chat_id: String,
    #[serde(default = "default_project_id")]
    pub project_id: String,
    pub message: String,
}

fn default_project_id() -> String {
    "default".into()
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

pub async fn send(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    let reply = send_pipeline::send(&state, &body.chat_id, &body.project_id, &body.message).await;
    Json(SendResponse {
        reply: reply.reply,
        pending_run_id: reply.pending_run_id,
        run_id: reply.run_id,
        status: reply.status,
    })
}
