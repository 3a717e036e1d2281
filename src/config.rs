//! Declarative configuration for every layer (§6 of the spec).
//!
//! Follows the `serde(deny_unknown_fields)` + `#[serde(default = "fn")]`
//! idiom used for TOML configs across the example corpus: every field has
//! an explicit documented default so a missing `labyrinth.toml` still
//! produces a usable configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    Low,
    Medium,
    High,
}

impl Default for Density {
    fn default() -> Self {
        Density::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum L3Policy {
    OnConnect,
    OnEscalation,
    Manual,
}

impl Default for L3Policy {
    fn default() -> Self {
        L3Policy::OnEscalation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum L4Mode {
    Passive,
    Neutralize,
    DoubleAgent,
    CounterIntel,
}

impl Default for L4Mode {
    fn default() -> Self {
        L4Mode::Passive
    }
}

impl L4Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            L4Mode::Passive => "passive",
            L4Mode::Neutralize => "neutralize",
            L4Mode::DoubleAgent => "double_agent",
            L4Mode::CounterIntel => "counter_intel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "passive" => Some(L4Mode::Passive),
            "neutralize" => Some(L4Mode::Neutralize),
            "double_agent" => Some(L4Mode::DoubleAgent),
            "counter_intel" => Some(L4Mode::CounterIntel),
            _ => None,
        }
    }

    pub fn all() -> &'static [L4Mode] {
        &[
            L4Mode::Passive,
            L4Mode::Neutralize,
            L4Mode::DoubleAgent,
            L4Mode::CounterIntel,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    Open,
    Closed,
}

impl Default for FailMode {
    fn default() -> Self {
        FailMode::Closed
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

fn default_session_timeout_secs() -> u64 {
    3600
}
fn default_id_prefix() -> String {
    "LBX".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout_secs(),
            id_prefix: default_id_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContradictionConfig {
    #[serde(default)]
    pub density: Density,
    #[serde(default = "default_max_depth")]
    pub max_container_depth: u32,
    #[serde(default)]
    pub adaptive: bool,
}

fn default_max_depth() -> u32 {
    5
}

impl Default for ContradictionConfig {
    fn default() -> Self {
        Self {
            density: Density::default(),
            max_container_depth: default_max_depth(),
            adaptive: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct L3Config {
    #[serde(default)]
    pub activation: L3Policy,
}

impl Default for L3Config {
    fn default() -> Self {
        Self {
            activation: L3Policy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct L4Config {
    #[serde(default)]
    pub default_mode: L4Mode,
    #[serde(default = "default_proxy_ip")]
    pub proxy_ip: String,
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
}

fn default_proxy_ip() -> String {
    "172.28.0.254".to_string()
}
fn default_proxy_port() -> u16 {
    8443
}

impl Default for L4Config {
    fn default() -> Self {
        Self {
            default_mode: L4Mode::default(),
            proxy_ip: default_proxy_ip(),
            proxy_port: default_proxy_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    #[serde(default = "default_credentials_days")]
    pub credentials_days: u64,
    #[serde(default = "default_fingerprints_days")]
    pub fingerprints_days: u64,
}

fn default_credentials_days() -> u64 {
    14
}
fn default_fingerprints_days() -> u64 {
    90
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            credentials_days: default_credentials_days(),
            fingerprints_days: default_fingerprints_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiemConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_alert_prefix")]
    pub alert_prefix: String,
}

fn default_alert_prefix() -> String {
    "LABYRINTH".to_string()
}

impl Default for SiemConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            alert_prefix: default_alert_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    #[serde(default = "default_network_name")]
    pub name: String,
    #[serde(default = "default_subnet")]
    pub subnet: String,
}

fn default_network_name() -> String {
    "labyrinth-net".to_string()
}
fn default_subnet() -> String {
    "172.28.0.0/16".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            subnet: default_subnet(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct L0Config {
    #[serde(default)]
    pub fail_mode: FailMode,
    #[serde(default = "default_true")]
    pub validate_on_startup: bool,
    #[serde(default = "default_l0_retries")]
    pub retries: u32,
    #[serde(default = "default_l0_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_l0_retries() -> u32 {
    5
}
fn default_l0_retry_delay_ms() -> u64 {
    1000
}

impl Default for L0Config {
    fn default() -> Self {
        Self {
            fail_mode: FailMode::default(),
            validate_on_startup: true,
            retries: default_l0_retries(),
            retry_delay_ms: default_l0_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub contradiction: ContradictionConfig,
    #[serde(default)]
    pub l3: L3Config,
    #[serde(default)]
    pub l4: L4Config,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub siem: SiemConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_forensics_dir")]
    pub forensics_dir: PathBuf,
    #[serde(default = "default_template_image")]
    pub session_template_image: String,
    #[serde(default)]
    pub l0: L0Config,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

fn default_forensics_dir() -> PathBuf {
    PathBuf::from("/forensics")
}
fn default_template_image() -> String {
    "labyrinth/session-template:latest".to_string()
}
fn default_control_port() -> u16 {
    9900
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            contradiction: ContradictionConfig::default(),
            l3: L3Config::default(),
            l4: L4Config::default(),
            retention: RetentionConfig::default(),
            siem: SiemConfig::default(),
            network: NetworkConfig::default(),
            forensics_dir: default_forensics_dir(),
            session_template_image: default_template_image(),
            l0: L0Config::default(),
            control_port: default_control_port(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults if the path does
    /// not exist. Applies environment variable overrides afterward.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
            toml::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?
        } else {
            Config::default()
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Environment overrides (§6): control port, log level (handled by the
    /// binary's logger init), test mode marker, default L4 mode.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("LABYRINTH_CONTROL_PORT") {
            if let Ok(p) = port.parse() {
                self.control_port = p;
            }
        }
        if let Ok(mode) = std::env::var("LABYRINTH_L4_DEFAULT_MODE") {
            if let Some(m) = L4Mode::parse(&mode) {
                self.l4.default_mode = m;
            }
        }
        if is_test_mode() {
            self.l0.fail_mode = FailMode::Open;
        }
    }
}

/// A designated "test" mode forces L0's fail policy open (§4.10).
pub fn is_test_mode() -> bool {
    std::env::var("LABYRINTH_TEST_MODE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.contradiction.max_container_depth, 5);
        assert_eq!(cfg.l4.default_mode, L4Mode::Passive);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/labyrinth.toml")).unwrap();
        assert_eq!(cfg.control_port, default_control_port());
    }

    #[test]
    fn load_parses_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labyrinth.toml");
        std::fs::write(
            &path,
            r#"
            control_port = 1234
            [contradiction]
            density = "high"
            max_container_depth = 8
            "#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.control_port, 1234);
        assert_eq!(cfg.contradiction.max_container_depth, 8);
        assert_eq!(cfg.contradiction.density, Density::High);
    }

    #[test]
    fn l4_mode_round_trips() {
        for m in L4Mode::all() {
            assert_eq!(L4Mode::parse(m.as_str()), Some(*m));
        }
        assert_eq!(L4Mode::parse("bogus"), None);
    }
}
