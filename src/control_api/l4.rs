//! `GET/POST /api/l4/mode` (§4.9): read or update the L4 interception mode.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::L4Mode;
use crate::l4_mode_file;

use super::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ModeResponse {
    pub mode: String,
    pub valid_modes: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetModeRequest {
    pub mode: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

fn valid_modes() -> Vec<String> {
    L4Mode::all().iter().map(|m| m.as_str().to_string()).collect()
}

#[utoipa::path(
    get,
    path = "/api/l4/mode",
    tag = "l4",
    responses((status = 200, description = "Current L4 mode", body = ModeResponse))
)]
pub async fn get_mode(State(state): State<AppState>) -> Json<ModeResponse> {
    let mode = l4_mode_file::read(&state.forensics_dir);
    Json(ModeResponse { mode: mode.as_str().to_string(), valid_modes: valid_modes() })
}

#[utoipa::path(
    post,
    path = "/api/l4/mode",
    tag = "l4",
    request_body = SetModeRequest,
    responses(
        (status = 200, description = "Mode updated", body = ModeResponse),
        (status = 400, description = "Unknown mode", body = ErrorResponse),
    )
)]
pub async fn set_mode(
    State(state): State<AppState>,
    Json(req): Json<SetModeRequest>,
) -> Result<Json<ModeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Some(mode) = L4Mode::parse(&req.mode) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: format!("unknown mode: {}", req.mode) }),
        ));
    };

    l4_mode_file::write(&state.forensics_dir, mode).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: e.to_string() }),
        )
    })?;

    Ok(Json(ModeResponse { mode: mode.as_str().to_string(), valid_modes: valid_modes() }))
}
