//! In-memory test double for [`super::ContainerRuntime`], grounded in the
//! teacher's `runtime/mock.rs` call-recording pattern.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{
    ContainerConfig, ContainerFilters, ContainerInfo, ContainerRuntime, ContainerState, ExecResult,
    RuntimeError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    Ping,
    EnsureNetwork(String, String),
    ImageExists(String),
    BuildImage(String),
    CreateContainer(String),
    StartContainer(String),
    StopContainer(String),
    RemoveContainer(String),
    ContainerState(String),
    ContainerIp(String),
    ListContainers,
    ContainerRunningByName(String),
    Exec(String, Vec<String>),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    name: String,
    image: String,
    state: ContainerState,
    ip: Option<String>,
    labels: HashMap<String, String>,
}

struct Inner {
    calls: Vec<RuntimeCall>,
    images: Vec<String>,
    networks: HashMap<String, String>, // name -> subnet
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    fail_create: bool,
    fail_start: bool,
    exec_results: HashMap<String, ExecResult>,
}

/// Records every call for assertion in orchestrator/container-manager tests
/// (§4.2, §4.10), mirroring the teacher's `MockRuntime`.
pub struct MockRuntime {
    inner: Mutex<Inner>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                calls: Vec::new(),
                images: Vec::new(),
                networks: HashMap::new(),
                containers: HashMap::new(),
                next_id: 1,
                fail_create: false,
                fail_start: false,
                exec_results: HashMap::new(),
            }),
        }
    }

    pub fn with_image(self, image: impl Into<String>) -> Self {
        self.inner.lock().unwrap().images.push(image.into());
        self
    }

    pub fn with_network(self, name: impl Into<String>, subnet: impl Into<String>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .networks
            .insert(name.into(), subnet.into());
        self
    }

    pub fn with_exec_result(self, id: impl Into<String>, result: ExecResult) -> Self {
        self.inner
            .lock()
            .unwrap()
            .exec_results
            .insert(id.into(), result);
        self
    }

    pub fn fail_create(self, fail: bool) -> Self {
        self.inner.lock().unwrap().fail_create = fail;
        self
    }

    pub fn fail_start(self, fail: bool) -> Self {
        self.inner.lock().unwrap().fail_start = fail;
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    pub fn was_called(&self, call: &RuntimeCall) -> bool {
        self.inner.lock().unwrap().calls.contains(call)
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().unwrap().containers.len()
    }

    pub fn set_container_running(&self, id: &str, running: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.containers.get_mut(id) {
            c.state = if running {
                ContainerState::Running
            } else {
                ContainerState::Stopped
            };
        }
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn engine_id(&self) -> &str {
        "mock"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.inner.lock().unwrap().calls.push(RuntimeCall::Ping);
        Ok(())
    }

    async fn ensure_network(&self, name: &str, subnet: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::EnsureNetwork(name.to_string(), subnet.to_string()));
        inner
            .networks
            .entry(name.to_string())
            .or_insert_with(|| subnet.to_string());
        Ok(())
    }

    async fn network_has_subnet(&self, name: &str, subnet: &str) -> Result<bool, RuntimeError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.networks.get(name).map(|s| s.as_str()) == Some(subnet))
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::ImageExists(image.to_string()));
        Ok(inner.images.contains(&image.to_string()))
    }

    async fn build_image(&self, _context_dir: &std::path::Path, tag: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::BuildImage(tag.to_string()));
        inner.images.push(tag.to_string());
        Ok(())
    }

    async fn create_container(&self, config: ContainerConfig) -> Result<String, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::CreateContainer(config.name.clone()));

        if inner.fail_create {
            return Err(RuntimeError::Other("mock: create_container configured to fail".into()));
        }

        let id = format!("mock-container-{}", inner.next_id);
        inner.next_id += 1;
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                name: config.name,
                image: config.image,
                state: ContainerState::Stopped,
                ip: Some("172.28.0.10".to_string()),
                labels: config.labels,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::StartContainer(id.to_string()));

        if inner.fail_start {
            return Err(RuntimeError::Other("mock: start_container configured to fail".into()));
        }

        let container = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout_secs: u32) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::StopContainer(id.to_string()));
        let container = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.state = ContainerState::Stopped;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::RemoveContainer(id.to_string()));
        inner
            .containers
            .remove(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        Ok(())
    }

    async fn container_state(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::ContainerState(id.to_string()));
        match inner.containers.get(id) {
            Some(c) => Ok(c.state),
            None => Ok(ContainerState::Gone),
        }
    }

    async fn container_ip(
        &self,
        id: &str,
        _network: &str,
        _retries: u32,
        _interval: Duration,
    ) -> Result<Option<String>, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::ContainerIp(id.to_string()));
        Ok(inner.containers.get(id).and_then(|c| c.ip.clone()))
    }

    async fn list_containers(
        &self,
        filters: ContainerFilters,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::ListContainers);
        Ok(inner
            .containers
            .iter()
            .filter(|(_, c)| {
                filters
                    .labels
                    .iter()
                    .all(|(k, v)| c.labels.get(k).map(|val| val == v).unwrap_or(v.is_empty()))
            })
            .map(|(id, c)| ContainerInfo {
                id: id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                state: format!("{:?}", c.state).to_lowercase(),
                status: format!("{:?}", c.state).to_lowercase(),
                labels: c.labels.clone(),
                ports: Vec::new(),
            })
            .collect())
    }

    async fn container_running_by_name(&self, name: &str) -> Result<bool, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::ContainerRunningByName(name.to_string()));
        Ok(inner
            .containers
            .values()
            .any(|c| c.name == name && c.state == ContainerState::Running))
    }

    async fn exec(&self, id: &str, cmd: Vec<String>) -> Result<ExecResult, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::Exec(id.to_string(), cmd.clone()));
        Ok(inner
            .exec_results
            .get(id)
            .cloned()
            .unwrap_or(ExecResult {
                exit_code: 0,
                output: String::new(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(name: &str) -> ContainerConfig {
        ContainerConfig {
            name: name.to_string(),
            image: "labyrinth/session-template:latest".to_string(),
            env_vars: vec![],
            labels: HashMap::new(),
            limits: super::super::ResourceLimits::default(),
            network: "labyrinth-net".to_string(),
            extra_hosts: vec![],
            forensics_volume: None,
        }
    }

    #[tokio::test]
    async fn create_then_start_records_calls_in_order() {
        let mock = MockRuntime::new();
        let id = mock.create_container(config("sess-1")).await.unwrap();
        mock.start_container(&id).await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls[0], RuntimeCall::CreateContainer("sess-1".to_string()));
        assert_eq!(calls[1], RuntimeCall::StartContainer(id));
    }

    #[tokio::test]
    async fn fail_create_returns_error() {
        let mock = MockRuntime::new().fail_create(true);
        assert!(mock.create_container(config("sess-1")).await.is_err());
    }

    #[tokio::test]
    async fn container_state_unknown_id_is_gone() {
        let mock = MockRuntime::new();
        let state = mock.container_state("nope").await.unwrap();
        assert_eq!(state, ContainerState::Gone);
    }

    #[tokio::test]
    async fn remove_then_state_is_gone() {
        let mock = MockRuntime::new();
        let id = mock.create_container(config("sess-1")).await.unwrap();
        mock.remove_container(&id).await.unwrap();
        assert_eq!(mock.container_state(&id).await.unwrap(), ContainerState::Gone);
    }

    #[tokio::test]
    async fn network_has_subnet_reflects_ensure_network() {
        let mock = MockRuntime::new();
        mock.ensure_network("labyrinth-net", "172.28.0.0/16")
            .await
            .unwrap();
        assert!(mock
            .network_has_subnet("labyrinth-net", "172.28.0.0/16")
            .await
            .unwrap());
        assert!(!mock
            .network_has_subnet("labyrinth-net", "10.0.0.0/16")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn exec_returns_configured_result() {
        let mock = MockRuntime::new().with_exec_result(
            "sess-1",
            ExecResult {
                exit_code: 0,
                output: "ok".to_string(),
            },
        );
        let result = mock.exec("sess-1", vec!["true".to_string()]).await.unwrap();
        assert_eq!(result.output, "ok");
    }

    #[tokio::test]
    async fn build_image_registers_tag() {
        let mock = MockRuntime::new();
        mock.build_image(Path::new("/tmp"), "labyrinth/session-template:latest")
            .await
            .unwrap();
        assert!(mock
            .image_exists("labyrinth/session-template:latest")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn container_running_by_name_tracks_state() {
        let mock = MockRuntime::new();
        let id = mock.create_container(config("sess-1")).await.unwrap();
        assert!(!mock.container_running_by_name("sess-1").await.unwrap());
        mock.start_container(&id).await.unwrap();
        assert!(mock.container_running_by_name("sess-1").await.unwrap());
    }
}
