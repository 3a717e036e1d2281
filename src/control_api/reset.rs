//! `POST /api/reset` (§4.9): reap all session containers and purge session
//! JSONL, auth events, and http events; return counts and per-item errors.

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ResetResponse {
    pub containers_reaped: usize,
    pub sessions_purged: usize,
    pub errors: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/api/reset",
    tag = "reset",
    responses((status = 200, description = "Reset counts and errors", body = ResetResponse))
)]
pub async fn reset(State(state): State<AppState>) -> Json<ResetResponse> {
    let report = state.orchestrator.reset().await;
    Json(ResetResponse {
        containers_reaped: report.containers_reaped,
        sessions_purged: report.sessions_purged,
        errors: report.errors,
    })
}
