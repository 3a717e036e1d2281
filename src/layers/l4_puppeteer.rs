//! L4 PuppeteerController — inline API interception enrollment (§4.6).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::container_manager::ContainerManager;
use crate::routing;

const RC_FILES: &[&str] = &["/root/.bashrc", "/root/.profile"];

/// Closed list of LLM API domains the proxy intercepts.
pub const LLM_API_DOMAINS: &[&str] = &[
    "api.openai.com",
    "api.anthropic.com",
    "generativelanguage.googleapis.com",
    "api.mistral.ai",
    "api.cohere.ai",
];

pub struct PuppeteerController {
    proxy_ip: String,
    forensics_dir: PathBuf,
}

impl PuppeteerController {
    pub fn new(proxy_ip: impl Into<String>, forensics_dir: impl Into<PathBuf>) -> Self {
        Self {
            proxy_ip: proxy_ip.into(),
            forensics_dir: forensics_dir.into(),
        }
    }

    /// `{domain -> proxy_ip}` for every domain in the closed LLM-API set.
    pub fn dns_overrides(&self) -> HashMap<String, String> {
        LLM_API_DOMAINS
            .iter()
            .map(|d| (d.to_string(), self.proxy_ip.clone()))
            .collect()
    }

    /// Execs a root command that exports the four proxy env vars and
    /// persists them into the rc files.
    pub async fn activate(&self, manager: &ContainerManager, container_id: &str, proxy_port: u16) {
        let proxy_url = format!("http://{}:{}", self.proxy_ip, proxy_port);
        let mut script = String::new();
        for var in ["http_proxy", "https_proxy", "HTTP_PROXY", "HTTPS_PROXY"] {
            script.push_str(&format!("export {var}={proxy_url}\n"));
        }
        for rc in RC_FILES {
            for var in ["http_proxy", "https_proxy", "HTTP_PROXY", "HTTPS_PROXY"] {
                script.push_str(&format!(
                    "grep -qxF 'export {var}={proxy_url}' {rc} || echo 'export {var}={proxy_url}' >> {rc}\n"
                ));
            }
        }

        let cmd = vec!["bash".to_string(), "-c".to_string(), script];
        if let Err(e) = manager.exec(container_id, cmd).await {
            log::warn!("L4 activation failed for {}: {}", container_id, e);
        }
    }

    fn proxy_session_map_path(&self) -> PathBuf {
        self.forensics_dir.join("proxy_session_map.json")
    }

    pub fn register(&self, container_ip: &str, session_id: &str) -> std::io::Result<()> {
        routing::upsert(&self.proxy_session_map_path(), container_ip, session_id)
    }

    pub fn unregister(&self, container_ip: &str) -> std::io::Result<()> {
        routing::remove(&self.proxy_session_map_path(), container_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_overrides_cover_closed_domain_set() {
        let ctl = PuppeteerController::new("172.28.0.254", "/forensics");
        let overrides = ctl.dns_overrides();
        assert_eq!(overrides.len(), LLM_API_DOMAINS.len());
        assert_eq!(
            overrides.get("api.openai.com"),
            Some(&"172.28.0.254".to_string())
        );
    }

    #[test]
    fn register_then_unregister_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = PuppeteerController::new("172.28.0.254", dir.path());
        ctl.register("172.28.0.10", "LBX-20260101-001").unwrap();

        let map = routing::read(&ctl.proxy_session_map_path()).unwrap();
        assert_eq!(map.get("172.28.0.10").map(String::as_str), Some("LBX-20260101-001"));

        ctl.unregister("172.28.0.10").unwrap();
        let map = routing::read(&ctl.proxy_session_map_path()).unwrap();
        assert!(!map.contains_key("172.28.0.10"));
    }
}
