//! Container runtime abstraction (§4.2, §4.10).
//!
//! Wraps the container runtime behind a trait so the orchestrator and L0
//! validator can be exercised against [`mock::MockRuntime`] without a real
//! Docker daemon, mirroring the teacher's `ContainerRuntime` seam.

pub mod docker;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// CPU/memory caps applied to a session container (§4.2 step iv).
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    /// CPU limit in nanoseconds (1e9 = 1 full core).
    pub nano_cpus: Option<i64>,
    pub memory_bytes: Option<i64>,
}

/// All parameters needed to create a session container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub env_vars: Vec<String>,
    pub labels: HashMap<String, String>,
    pub limits: ResourceLimits,
    pub network: String,
    /// `"hostname:ip"` entries — per-domain DNS overrides steering LLM API
    /// hosts to the proxy IP (§4.2 step vii).
    pub extra_hosts: Vec<String>,
    /// Forensic volume, mounted read-write (§4.2 step vi).
    pub forensics_volume: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Gone,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub labels: HashMap<String, String>,
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerFilters {
    pub labels: HashMap<String, String>,
}

/// Result of a `docker exec` into a live container (§4.2, §4.6 L3/L4 activation).
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i64,
    pub output: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn engine_id(&self) -> &str;

    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Verify the named network exists with the expected subnet, creating
    /// it if absent (§4.2). Used directly by the L0 validator too.
    async fn ensure_network(&self, name: &str, subnet: &str) -> Result<(), RuntimeError>;
    async fn network_has_subnet(&self, name: &str, subnet: &str) -> Result<bool, RuntimeError>;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError>;

    async fn create_container(&self, config: ContainerConfig) -> Result<String, RuntimeError>;
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn stop_container(&self, id: &str, timeout_secs: u32) -> Result<(), RuntimeError>;
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn container_state(&self, id: &str) -> Result<ContainerState, RuntimeError>;

    /// Poll until the container's network attachment has an IP, up to
    /// `retries` attempts spaced `interval` apart (§4.2 step ix).
    async fn container_ip(
        &self,
        id: &str,
        network: &str,
        retries: u32,
        interval: std::time::Duration,
    ) -> Result<Option<String>, RuntimeError>;

    async fn list_containers(
        &self,
        filters: ContainerFilters,
    ) -> Result<Vec<ContainerInfo>, RuntimeError>;

    /// Is a container with this name currently running? Used by the L0
    /// validator to check for the `proxy` container (§4.10).
    async fn container_running_by_name(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Execute a root-privileged command inside a live container, used by
    /// L3/L4 activation and CA-cert injection (§4.6, §9).
    async fn exec(&self, id: &str, cmd: Vec<String>) -> Result<ExecResult, RuntimeError>;
}
