//! Read-only admin API.
//!
//! | Route       | Body                                                   |
//! |-------------|--------------------------------------------------------|
//! | `/health`   | `{status, version}`                                    |
//! | `/identity` | `{server, version, public_key, request_queue}`         |
//! | `/stats`    | `{pending_requests, pending_responses, rate_windows}`  |

use crate::service::StatsReporter;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

/// Shared state of the admin handlers
#[derive(Clone)]
pub struct AdminState {
    pub server: String,
    pub public_key: String,
    pub request_queue: String,
    pub stats: Arc<StatsReporter>,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/identity", get(identity))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION
    }))
}

async fn identity(State(state): State<AdminState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "server": state.server,
        "version": crate::VERSION,
        "public_key": state.public_key,
        "request_queue": state.request_queue,
    }))
}

async fn stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}
