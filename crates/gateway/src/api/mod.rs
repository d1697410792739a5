pub mod auth;
pub mod chats;
pub mod health;
pub mod runs;
pub mod send;
pub mod tools;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the configured bearer-token middleware).
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/chats/:chat_id/messages", get(chats::messages))
        .route("/v1/runs/:run_id", get(runs::get_run))
        .route("/v1/tools", get(tools::list_tools));

    let protected = Router::new()
        .route("/v1/send", post(send::send))
        .route("/v1/runs/:run_id/start", post(runs::start_run))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
