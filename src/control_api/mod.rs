//! Control API (§4.9, §6): small private HTTP surface exposing container
//! inventory, L4 mode read/write, intel summaries, and a full reset. Grounded
//! in the teacher's `host_api::start_server` Router/CORS/serve composition,
//! trimmed to a single un-nested `/api` tree since this surface has no
//! per-route auth middleware — it binds to a private port, never the
//! project network's public side (§6).

mod containers;
mod intel;
mod l4;
mod reset;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{routing, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::orchestrator::Orchestrator;
use crate::runtime::ContainerRuntime;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub forensics_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/containers", routing::get(containers::list_containers))
        .route(
            "/l4/mode",
            routing::get(l4::get_mode).post(l4::set_mode),
        )
        .route("/l4/intel", routing::get(intel::list_intel))
        .route("/reset", routing::post(reset::reset));

    Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .with_state(state)
}

/// Bind and serve the control API until the process exits.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("control API listening on :{}", port);
    axum::serve(listener, app)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}
