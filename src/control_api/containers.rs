//! `GET /api/containers` (§4.9): container inventory split into
//! `infrastructure` (label `layer` != `session`) and `sessions`.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::container_manager::{LAYER_LABEL, PROJECT_LABEL, SESSION_LAYER_VALUE};
use crate::runtime::ContainerFilters;

use super::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ContainerView {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub layer: String,
    pub ports: Vec<String>,
}

impl From<crate::runtime::ContainerInfo> for ContainerView {
    fn from(c: crate::runtime::ContainerInfo) -> Self {
        let layer = c
            .labels
            .get(LAYER_LABEL)
            .cloned()
            .unwrap_or_else(|| "infrastructure".to_string());
        Self {
            id: c.id,
            name: c.name,
            image: c.image,
            state: c.state,
            status: c.status,
            layer,
            ports: c.ports,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContainerInventory {
    pub infrastructure: Vec<ContainerView>,
    pub sessions: Vec<ContainerView>,
}

#[utoipa::path(
    get,
    path = "/api/containers",
    tag = "containers",
    responses(
        (status = 200, description = "Project container inventory", body = ContainerInventory),
    )
)]
pub async fn list_containers(State(state): State<AppState>) -> Result<Json<ContainerInventory>, StatusCode> {
    let mut filters = ContainerFilters::default();
    filters.labels.insert(PROJECT_LABEL.to_string(), "labyrinth".to_string());

    let containers = state
        .runtime
        .list_containers(filters)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut infrastructure = Vec::new();
    let mut sessions = Vec::new();
    for c in containers {
        let is_session = c.labels.get(LAYER_LABEL).map(String::as_str) == Some(SESSION_LAYER_VALUE);
        let view = ContainerView::from(c);
        if is_session {
            sessions.push(view);
        } else {
            infrastructure.push(view);
        }
    }

    Ok(Json(ContainerInventory { infrastructure, sessions }))
}
