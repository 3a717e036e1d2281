//! Routing fabric (§3, §4.7, §9): two `{string -> string}` JSON maps on the
//! shared forensics volume — `session_forward_map.json` (src-ip ->
//! container-ip, read by the SSH front-door) and `proxy_session_map.json`
//! (container-ip -> session-id, read by the MITM addon). The orchestrator is
//! the sole writer; every write is a whole-file rewrite via
//! [`crate::util::atomic_write`]. Readers (external processes) must tolerate
//! a missing or malformed file — treated here as an empty map.

use std::collections::HashMap;
use std::path::Path;

use crate::util::atomic_write;

pub const SESSION_FORWARD_MAP_FILE: &str = "session_forward_map.json";
pub const PROXY_SESSION_MAP_FILE: &str = "proxy_session_map.json";

/// Read a routing map, treating a missing or malformed file as empty.
pub fn read(path: &Path) -> std::io::Result<HashMap<String, String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e),
    };
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

/// Insert or update one mapping and rewrite the whole file atomically.
pub fn upsert(path: &Path, key: &str, value: &str) -> std::io::Result<()> {
    let mut map = read(path)?;
    map.insert(key.to_string(), value.to_string());
    write(path, &map)
}

/// Remove a mapping (no-op if absent) and rewrite the whole file atomically.
pub fn remove(path: &Path, key: &str) -> std::io::Result<()> {
    let mut map = read(path)?;
    map.remove(key);
    write(path, &map)
}

fn write(path: &Path, map: &HashMap<String, String>) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(map)?;
    atomic_write(path, &json)
}

/// Handle bundling both routing-map paths, held by the orchestrator.
pub struct RoutingFabric {
    forward_map_path: std::path::PathBuf,
    proxy_map_path: std::path::PathBuf,
}

impl RoutingFabric {
    pub fn new(forensics_dir: &Path) -> Self {
        Self {
            forward_map_path: forensics_dir.join(SESSION_FORWARD_MAP_FILE),
            proxy_map_path: forensics_dir.join(PROXY_SESSION_MAP_FILE),
        }
    }

    pub fn forward_src_ip_to_container_ip(&self, src_ip: &str, container_ip: &str) -> std::io::Result<()> {
        upsert(&self.forward_map_path, src_ip, container_ip)
    }

    pub fn unforward_src_ip(&self, src_ip: &str) -> std::io::Result<()> {
        remove(&self.forward_map_path, src_ip)
    }

    pub fn register_proxy_session(&self, container_ip: &str, session_id: &str) -> std::io::Result<()> {
        upsert(&self.proxy_map_path, container_ip, session_id)
    }

    pub fn unregister_proxy_session(&self, container_ip: &str) -> std::io::Result<()> {
        remove(&self.proxy_map_path, container_ip)
    }

    pub fn forward_map(&self) -> std::io::Result<HashMap<String, String>> {
        read(&self.forward_map_path)
    }

    pub fn proxy_map(&self) -> std::io::Result<HashMap<String, String>> {
        read(&self.proxy_map_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_forward_map.json");
        let map = read(&path).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn malformed_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_forward_map.json");
        std::fs::write(&path, "not json").unwrap();
        let map = read(&path).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn upsert_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_forward_map.json");
        upsert(&path, "10.0.0.1", "172.28.0.10").unwrap();
        let map = read(&path).unwrap();
        assert_eq!(map.get("10.0.0.1"), Some(&"172.28.0.10".to_string()));
    }

    #[test]
    fn remove_on_unknown_key_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session_forward_map.json");
        upsert(&path, "10.0.0.1", "172.28.0.10").unwrap();
        remove(&path, "10.0.0.2").unwrap();
        let map = read(&path).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn routing_fabric_keeps_maps_independent() {
        let dir = tempfile::tempdir().unwrap();
        let fabric = RoutingFabric::new(dir.path());
        fabric
            .forward_src_ip_to_container_ip("10.0.0.1", "172.28.0.10")
            .unwrap();
        fabric
            .register_proxy_session("172.28.0.10", "LBX-20260101-001")
            .unwrap();

        assert_eq!(fabric.forward_map().unwrap().len(), 1);
        assert_eq!(fabric.proxy_map().unwrap().len(), 1);

        fabric.unforward_src_ip("10.0.0.1").unwrap();
        assert!(fabric.forward_map().unwrap().is_empty());
        assert_eq!(fabric.proxy_map().unwrap().len(), 1);
    }
}
