//! Container manager (§4.2).
//!
//! Wraps [`ContainerRuntime`] with the session-container lifecycle: template
//! verification, spawn with synthesized entrypoint, scheduled removal, and
//! full reap. Grounded in the teacher's `plugin_manager` call sites onto
//! `runtime::ContainerRuntime`, generalized from one plugin container per
//! install to one container per session depth.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::contradiction::{self, Contradiction};
use crate::entrypoint::{self, EntrypointSpec};
use crate::runtime::{ContainerConfig, ContainerFilters, ContainerRuntime, ResourceLimits};
use crate::session::Session;

pub const PROJECT_LABEL: &str = "labyrinth.project";
pub const LAYER_LABEL: &str = "labyrinth.layer";
pub const SESSION_ID_LABEL: &str = "labyrinth.session_id";
pub const SESSION_LAYER_VALUE: &str = "session";

const IP_POLL_RETRIES: u32 = 20;
const IP_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct SpawnRequest<'a> {
    pub session: &'a Session,
    pub contradictions: &'a [&'a Contradiction],
    pub l3_active: bool,
    pub l4_active: bool,
    pub dns_overrides: &'a HashMap<String, String>,
    pub network: String,
    pub forensics_volume: Option<String>,
    pub forensics_dir: String,
    pub proxy_ip: String,
    pub proxy_port: u16,
    pub template_image: String,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnResult {
    pub container_id: Option<String>,
    pub container_ip: Option<String>,
}

pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Verify the session template image exists, building it from
    /// `dockerfile_dir` if missing. Build failure is logged and swallowed —
    /// the caller continues; later spawns will simply fail to find the image.
    pub async fn ensure_template(&self, image: &str, dockerfile_dir: &Path) {
        match self.runtime.image_exists(image).await {
            Ok(true) => {}
            Ok(false) => {
                log::info!("session template image {} absent, building", image);
                if let Err(e) = self.runtime.build_image(dockerfile_dir, image).await {
                    log::error!("failed to build session template image {}: {}", image, e);
                }
            }
            Err(e) => {
                log::error!("failed to check session template image {}: {}", image, e);
            }
        }
    }

    /// Spawn a session container per §4.2 steps i-ix. Returns empty fields
    /// on any failure — callers treat that as "no container for this
    /// session" and skip L3/L4 activation.
    pub async fn spawn(&self, req: SpawnRequest<'_>) -> SpawnResult {
        let spec = EntrypointSpec {
            session_id: &req.session.id,
            contradictions: req.contradictions,
            l3_active: req.l3_active,
            l4_active: req.l4_active,
            proxy_ip: req.proxy_ip.clone(),
            proxy_port: req.proxy_port,
            forensics_dir: &req.forensics_dir,
        };
        let encoded_entrypoint = entrypoint::encode(&spec);

        let mut labels = HashMap::new();
        labels.insert(PROJECT_LABEL.to_string(), "labyrinth".to_string());
        labels.insert(LAYER_LABEL.to_string(), SESSION_LAYER_VALUE.to_string());
        labels.insert(SESSION_ID_LABEL.to_string(), req.session.id.clone());

        let extra_hosts: Vec<String> = req
            .dns_overrides
            .iter()
            .map(|(domain, ip)| format!("{domain}:{ip}"))
            .collect();

        let name = format!("labyrinth-session-{}", req.session.id.to_lowercase());

        let config = ContainerConfig {
            name,
            image: req.template_image,
            env_vars: vec![format!("LABYRINTH_ENTRYPOINT_B64={}", encoded_entrypoint)],
            labels,
            limits: ResourceLimits {
                nano_cpus: Some(1_000_000_000),
                memory_bytes: Some(512 * 1024 * 1024),
            },
            network: req.network.clone(),
            extra_hosts,
            forensics_volume: req.forensics_volume,
        };

        let container_id = match self.runtime.create_container(config).await {
            Ok(id) => id,
            Err(e) => {
                log::error!("spawn failed for session {}: {}", req.session.id, e);
                return SpawnResult::default();
            }
        };

        if let Err(e) = self.runtime.start_container(&container_id).await {
            log::error!(
                "failed to start container {} for session {}: {}",
                container_id,
                req.session.id,
                e
            );
            return SpawnResult::default();
        }

        let ip = match self
            .runtime
            .container_ip(&container_id, &req.network, IP_POLL_RETRIES, IP_POLL_INTERVAL)
            .await
        {
            Ok(Some(ip)) => ip,
            Ok(None) => {
                log::error!(
                    "container {} for session {} never got an IP after {} retries",
                    container_id,
                    req.session.id,
                    IP_POLL_RETRIES
                );
                return SpawnResult::default();
            }
            Err(e) => {
                log::error!("failed polling IP for container {}: {}", container_id, e);
                return SpawnResult::default();
            }
        };

        SpawnResult {
            container_id: Some(container_id),
            container_ip: Some(ip),
        }
    }

    /// Fire-and-forget scheduled removal: after `delay`, stop then force-remove.
    pub fn schedule_removal(&self, container_id: String, delay: Duration) {
        let runtime = self.runtime.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = runtime.stop_container(&container_id, 10).await {
                log::warn!("scheduled stop failed for {}: {}", container_id, e);
            }
            if let Err(e) = runtime.remove_container(&container_id).await {
                log::warn!("scheduled removal failed for {}: {}", container_id, e);
            }
        });
    }

    /// Idempotent stop + force-remove; a missing container is not an error.
    pub async fn cleanup(&self, container_id: &str) {
        if let Err(e) = self.runtime.stop_container(container_id, 10).await {
            log::debug!("cleanup stop on {} (already gone?): {}", container_id, e);
        }
        if let Err(e) = self.runtime.remove_container(container_id).await {
            log::debug!("cleanup remove on {} (already gone?): {}", container_id, e);
        }
    }

    /// Reap every container bearing the session layer label.
    pub async fn cleanup_all(&self) -> usize {
        let mut filters = ContainerFilters::default();
        filters
            .labels
            .insert(LAYER_LABEL.to_string(), SESSION_LAYER_VALUE.to_string());

        let containers = match self.runtime.list_containers(filters).await {
            Ok(c) => c,
            Err(e) => {
                log::error!("cleanup_all: failed to list session containers: {}", e);
                return 0;
            }
        };

        let count = containers.len();
        for c in containers {
            self.cleanup(&c.id).await;
        }
        count
    }

    /// Exec a root command in a live container — the shared primitive behind
    /// L3/L4 activation and CA-cert injection.
    pub async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<String, String> {
        self.runtime
            .exec(container_id, cmd)
            .await
            .map(|r| r.output)
            .map_err(|e| e.to_string())
    }
}

/// Per spec §9's supplemented CA-cert injection: writes the proxy's CA
/// certificate into the container's trust store and refreshes it.
pub async fn inject_ca_cert(manager: &ContainerManager, container_id: &str, ca_cert_pem: &str) {
    let cmd = vec![
        "bash".to_string(),
        "-c".to_string(),
        format!(
            "cat > /usr/local/share/ca-certificates/labyrinth-proxy.crt <<'EOF'\n{}\nEOF\nupdate-ca-certificates >/dev/null 2>&1 || true",
            ca_cert_pem
        ),
    ];
    if let Err(e) = manager.exec(container_id, cmd).await {
        log::warn!("CA cert injection failed for {}: {}", container_id, e);
    }
}
