//! `labyrinthd` — the orchestrator binary (§4.1, §4.5, §4.7, §4.9-4.11).
//!
//! Loads configuration, runs the L0 pre-flight check, then brings up the
//! forensic writer, container manager, orchestrator state machine, event
//! watcher, and control API concurrently, with a background loop driving
//! the session-timeout and retention sweeps.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use labyrinth::config::Config;
use labyrinth::container_manager::ContainerManager;
use labyrinth::control_api::{self, AppState};
use labyrinth::l0_validator;
use labyrinth::mitm::ca::CertificateAuthority;
use labyrinth::orchestrator::Orchestrator;
use labyrinth::retention;
use labyrinth::runtime::docker::DockerRuntime;
use labyrinth::runtime::ContainerRuntime;
use labyrinth::watcher::EventWatcher;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    env_logger::init();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/labyrinth/labyrinth.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load config from {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    let runtime: Arc<dyn ContainerRuntime> = match DockerRuntime::new() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            log::error!("failed to connect to container runtime: {}", e);
            std::process::exit(1);
        }
    };

    if config.l0.validate_on_startup {
        let outcome = l0_validator::validate(&runtime, &config).await;
        if !l0_validator::should_proceed(&outcome, &config) {
            std::process::exit(1);
        }
    }

    if let Err(e) = std::fs::create_dir_all(&config.forensics_dir) {
        log::error!("failed to create forensics directory {}: {}", config.forensics_dir.display(), e);
        std::process::exit(1);
    }

    let ca = match CertificateAuthority::load_or_generate(&config.forensics_dir) {
        Ok(ca) => Arc::new(ca),
        Err(e) => {
            log::error!("failed to load or generate interception CA: {}", e);
            std::process::exit(1);
        }
    };

    let (forensics, forensics_task) = labyrinth::forensics::create(config.forensics_dir.clone(), config.siem.clone());
    tokio::spawn(forensics_task);

    let manager = ContainerManager::new(runtime.clone());
    manager
        .ensure_template(&config.session_template_image, &PathBuf::from("/etc/labyrinth/session-template"))
        .await;

    let control_port = config.control_port;
    let forensics_dir = config.forensics_dir.clone();
    let retention_config = config.retention.clone();

    let orchestrator = Arc::new(Orchestrator::new(config, manager, forensics, ca));

    let watcher_handle = match EventWatcher::start(forensics_dir.clone(), orchestrator.clone()) {
        Ok(h) => h,
        Err(e) => {
            log::error!("failed to start event watcher: {}", e);
            std::process::exit(1);
        }
    };

    let control_state = AppState {
        orchestrator: orchestrator.clone(),
        runtime: runtime.clone(),
        forensics_dir: forensics_dir.clone(),
    };
    let control_api_task = tokio::spawn(async move {
        if let Err(e) = control_api::serve(control_state, control_port).await {
            log::error!("control API server exited: {}", e);
        }
    });

    let sweep_orchestrator = orchestrator.clone();
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sweep_orchestrator.sweep_expired().await;
        }
    });

    // retention sweep runs hourly per §4.11, independent of the (more frequent)
    // session-timeout sweep above.
    let retention_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETENTION_INTERVAL);
        loop {
            interval.tick().await;
            let report = retention::sweep(&forensics_dir, &retention_config);
            if report.sessions_purged > 0 || report.prompts_purged > 0 {
                log::info!(
                    "retention sweep purged {} session logs, {} prompt logs",
                    report.sessions_purged,
                    report.prompts_purged
                );
            }
        }
    });

    log::info!(
        "labyrinthd started (commit {}, control API on :{})",
        env!("LABYRINTH_COMMIT"),
        control_port
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received");
        }
        _ = control_api_task => {
            log::error!("control API task terminated unexpectedly");
        }
        _ = sweep_task => {
            log::error!("sweep task terminated unexpectedly");
        }
        _ = retention_task => {
            log::error!("retention task terminated unexpectedly");
        }
    }

    drop(watcher_handle);
    orchestrator.shutdown().await;
}
