//! `GET /api/l4/intel` (§4.9): enumerate per-session dossier summaries.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::intel::{self, IntelSummary};

use super::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct DossierSummary {
    pub session_id: String,
    pub summary: IntelSummary,
}

#[utoipa::path(
    get,
    path = "/api/l4/intel",
    tag = "intel",
    responses((status = 200, description = "Per-session intel dossier summaries", body = Vec<DossierSummary>))
)]
pub async fn list_intel(State(state): State<AppState>) -> Result<Json<Vec<DossierSummary>>, StatusCode> {
    let dossiers = intel::list(&state.forensics_dir);
    Ok(Json(
        dossiers
            .into_iter()
            .map(|d| DossierSummary { session_id: d.session_id, summary: d.summary })
            .collect(),
    ))
}
