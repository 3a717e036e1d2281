use async_trait::async_trait;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::query_parameters::{
    BuildImageOptions, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    ListNetworksOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::service::{ContainerCreateBody, HostConfig, Mount, MountTypeEnum, NetworkCreateRequest};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use super::{
    ContainerConfig, ContainerFilters, ContainerInfo, ContainerRuntime, ContainerState, ExecResult,
    RuntimeError,
};

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Other(format!("Docker connection failed: {e}")))?;
        Ok(Self { docker })
    }
}

fn to_err(e: bollard::errors::Error) -> RuntimeError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(e.to_string()),
        _ => RuntimeError::Other(e.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn engine_id(&self) -> &str {
        "docker"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(to_err)?;
        Ok(())
    }

    async fn ensure_network(&self, name: &str, subnet: &str) -> Result<(), RuntimeError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions>)
            .await
            .map_err(to_err)?;

        let exists = networks
            .iter()
            .any(|n| n.name.as_deref().is_some_and(|n| n == name));

        if !exists {
            self.docker
                .create_network(NetworkCreateRequest {
                    name: name.to_string(),
                    driver: Some("bridge".to_string()),
                    ipam: Some(bollard::service::Ipam {
                        config: Some(vec![bollard::service::IpamConfig {
                            subnet: Some(subnet.to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .await
                .map_err(to_err)?;
            log::info!("Created Docker network: {} ({})", name, subnet);
        }

        Ok(())
    }

    async fn network_has_subnet(&self, name: &str, subnet: &str) -> Result<bool, RuntimeError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions>)
            .await
            .map_err(to_err)?;

        Ok(networks.iter().any(|n| {
            let name_matches = n
                .name
                .as_deref()
                .is_some_and(|n_name| n_name == name || n_name.ends_with(name));
            let subnet_matches = n
                .ipam
                .as_ref()
                .and_then(|ipam| ipam.config.as_ref())
                .is_some_and(|cfgs| cfgs.iter().any(|c| c.subnet.as_deref() == Some(subnet)));
            name_matches && subnet_matches
        }))
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(to_err(e)),
        }
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError> {
        let tar_bytes = create_build_context(context_dir)?;

        let opts = BuildImageOptions {
            t: Some(tag.to_string()),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let body = bollard::body_full(tar_bytes.into());
        let mut stream = self.docker.build_image(opts, None, Some(body));
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(stream) = info.stream {
                        let msg = stream.trim();
                        if !msg.is_empty() {
                            log::debug!("Build: {}", msg);
                        }
                    }
                    if let Some(detail) = info.error_detail {
                        let msg = detail.message.unwrap_or_default();
                        return Err(RuntimeError::Other(format!("Docker build error: {}", msg)));
                    }
                }
                Err(e) => return Err(to_err(e)),
            }
        }

        log::info!("Built image: {}", tag);
        Ok(())
    }

    async fn create_container(&self, config: ContainerConfig) -> Result<String, RuntimeError> {
        let mounts = match config.forensics_volume {
            Some(ref vol_name) => vec![Mount {
                target: Some("/forensics".to_string()),
                source: Some(vol_name.to_string()),
                typ: Some(MountTypeEnum::VOLUME),
                read_only: Some(false),
                ..Default::default()
            }],
            None => vec![],
        };

        let host_config = HostConfig {
            network_mode: Some(config.network.clone()),
            extra_hosts: Some(config.extra_hosts.clone()),
            cap_drop: Some(vec!["ALL".to_string()]),
            cap_add: Some(vec!["NET_BIND_SERVICE".to_string(), "CHOWN".to_string()]),
            mounts: Some(mounts),
            nano_cpus: config.limits.nano_cpus,
            memory: config.limits.memory_bytes,
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(config.image.clone()),
            env: Some(config.env_vars.clone()),
            labels: Some(config.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(config.name.clone()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(opts), body)
            .await
            .map_err(to_err)?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None)
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: Some(timeout_secs as i32),
                    signal: None,
                }),
            )
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn container_state(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(to_err)?;

        let running = info.state.and_then(|s| s.running).unwrap_or(false);

        Ok(if running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        })
    }

    async fn container_ip(
        &self,
        id: &str,
        network: &str,
        retries: u32,
        interval: Duration,
    ) -> Result<Option<String>, RuntimeError> {
        for attempt in 0..retries {
            let info = self
                .docker
                .inspect_container(id, None::<InspectContainerOptions>)
                .await
                .map_err(to_err)?;

            let ip = info
                .network_settings
                .as_ref()
                .and_then(|ns| ns.networks.as_ref())
                .and_then(|nets| nets.get(network))
                .and_then(|ep| ep.ip_address.clone())
                .filter(|ip| !ip.is_empty());

            if ip.is_some() {
                return Ok(ip);
            }

            if attempt + 1 < retries {
                tokio::time::sleep(interval).await;
            }
        }
        Ok(None)
    }

    async fn list_containers(
        &self,
        filters: ContainerFilters,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut filter_map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in &filters.labels {
            filter_map
                .entry("label".to_string())
                .or_default()
                .push(if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                });
        }

        let opts = ListContainersOptions {
            all: true,
            filters: Some(filter_map),
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(opts)).await.map_err(to_err)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .next()
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                state: c.state.map(|s| s.to_string()).unwrap_or_default(),
                status: c.status.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
                ports: c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| {
                        p.public_port
                            .map(|pub_port| format!("{}->{}", pub_port, p.private_port))
                    })
                    .collect(),
            })
            .collect())
    }

    async fn container_running_by_name(&self, name: &str) -> Result<bool, RuntimeError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters: Some(filters),
                ..Default::default()
            }))
            .await
            .map_err(to_err)?;
        Ok(!containers.is_empty())
    }

    async fn exec(&self, id: &str, cmd: Vec<String>) -> Result<ExecResult, RuntimeError> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(to_err)?;

        let mut output = String::new();
        if let StartExecResults::Attached { mut output: stream, .. } =
            self.docker.start_exec(&exec.id, None).await.map_err(to_err)?
        {
            while let Some(Ok(msg)) = stream.next().await {
                output.push_str(&msg.to_string());
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await.map_err(to_err)?;
        Ok(ExecResult {
            exit_code: inspect.exit_code.unwrap_or(0),
            output,
        })
    }
}

// ---------------------------------------------------------------------------
// Build-context helpers, adapted from the teacher's dockerignore-aware tar
// builder (same glob-to-regex approach).
// ---------------------------------------------------------------------------

fn parse_dockerignore(context_dir: &Path) -> Vec<(String, bool)> {
    let ignore_path = context_dir.join(".dockerignore");
    let content = match std::fs::read_to_string(&ignore_path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    content
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return None;
            }
            if let Some(pattern) = trimmed.strip_prefix('!') {
                let pattern = pattern.trim_end_matches('/');
                Some((pattern.to_string(), true))
            } else {
                let pattern = trimmed.trim_end_matches('/');
                Some((pattern.to_string(), false))
            }
        })
        .collect()
}

fn is_ignored(rel_path: &str, rules: &[(String, bool)]) -> bool {
    let mut ignored = false;
    for (pattern, negated) in rules {
        let matches =
            glob_match(pattern, rel_path) || rel_path.starts_with(&format!("{}/", pattern));
        if matches {
            ignored = !negated;
        }
    }
    ignored
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let mut regex_str = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(ch);
            }
            _ => regex_str.push(ch),
        }
    }
    regex_str.push('$');
    regex::Regex::new(&regex_str)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn create_build_context(context_dir: &Path) -> Result<Vec<u8>, RuntimeError> {
    let rules = parse_dockerignore(context_dir);
    let mut archive = tar::Builder::new(Vec::new());

    fn walk_dir(
        dir: &Path,
        base: &Path,
        rules: &[(String, bool)],
        archive: &mut tar::Builder<Vec<u8>>,
    ) -> Result<(), RuntimeError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            RuntimeError::Other(format!("Failed to read dir {}: {}", dir.display(), e))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| RuntimeError::Other(e.to_string()))?;
            let abs_path = entry.path();
            let rel_path = abs_path
                .strip_prefix(base)
                .unwrap_or(&abs_path)
                .to_string_lossy();

            if is_ignored(&rel_path, rules) {
                continue;
            }

            if abs_path.is_dir() {
                walk_dir(&abs_path, base, rules, archive)?;
            } else {
                archive
                    .append_path_with_name(&abs_path, &*rel_path)
                    .map_err(|e| {
                        RuntimeError::Other(format!(
                            "Failed to add {} to build context: {}",
                            rel_path, e
                        ))
                    })?;
            }
        }
        Ok(())
    }

    walk_dir(context_dir, context_dir, &rules, &mut archive)?;

    archive
        .into_inner()
        .map_err(|e| RuntimeError::Other(format!("Failed to finalize build context: {}", e)))
}
