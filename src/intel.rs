//! Intel dossier (§3, §6, §9): per-session accumulating summary of what the
//! MITM addon has observed, one JSON file at `{FORENSICS}/intel/{session_id}.json`.
//! The dossier is the single writer-per-session contract shared between
//! [`crate::mitm`] (writer) and [`crate::control_api`] (reader, §4.9
//! `GET /api/l4/intel`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::util::atomic_write;

const DIR_NAME: &str = "intel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    OpenaiProject,
    OpenaiLegacy,
    Anthropic,
    Unknown,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::OpenaiProject => "openai_project",
            KeyType::OpenaiLegacy => "openai_legacy",
            KeyType::Anthropic => "anthropic",
            KeyType::Unknown => "unknown",
        }
    }
}

/// Classify a raw API key by its prefix. Never stores the raw key itself.
pub fn classify_key(raw: &str) -> KeyType {
    if raw.starts_with("sk-proj-") {
        KeyType::OpenaiProject
    } else if raw.starts_with("sk-ant-") {
        KeyType::Anthropic
    } else if raw.starts_with("sk-") {
        KeyType::OpenaiLegacy
    } else {
        KeyType::Unknown
    }
}

/// Below this length, masking a key would reveal nearly all of it anyway —
/// the dossier stores it verbatim instead (§9 "signed masking" design note).
const MASK_LENGTH_THRESHOLD: usize = 12;

/// Mask a raw key as `prefix…suffix` (length threshold, §9); short strings
/// are stored as-is since prefix+suffix would cover the whole value.
pub fn mask_key(raw: &str) -> String {
    if raw.len() < MASK_LENGTH_THRESHOLD {
        return raw.to_string();
    }
    let prefix = &raw[..6];
    let suffix = &raw[raw.len() - 4..];
    format!("{prefix}…{suffix}")
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MaskedKey {
    pub masked: String,
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolDef {
    pub name: String,
    pub description_prefix: String,
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntelSummary {
    pub api_keys: Vec<MaskedKey>,
    pub models: Vec<String>,
    pub org_ids: Vec<String>,
    pub user_agents: Vec<String>,
    pub tools: Vec<ToolDef>,
    pub domains: Vec<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub intercept_count: u64,
}

impl Default for IntelSummary {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            models: Vec::new(),
            org_ids: Vec::new(),
            user_agents: Vec::new(),
            tools: Vec::new(),
            domains: Vec::new(),
            first_seen: None,
            last_seen: None,
            intercept_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntelDossier {
    pub session_id: String,
    pub intercepts: Vec<serde_json::Value>,
    pub summary: IntelSummary,
}

impl IntelDossier {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            intercepts: Vec::new(),
            summary: IntelSummary::default(),
        }
    }

    /// Fold one intercept record into the running summary and append it to
    /// the raw intercept log (§3: "accumulating summary").
    pub fn record_intercept(
        &mut self,
        record: serde_json::Value,
        api_key: Option<&str>,
        model: Option<&str>,
        org_id: Option<&str>,
        user_agent: Option<&str>,
        tools: &[ToolDef],
        domain: &str,
    ) {
        let now = Utc::now();
        if self.summary.first_seen.is_none() {
            self.summary.first_seen = Some(now);
        }
        self.summary.last_seen = Some(now);
        self.summary.intercept_count += 1;

        if let Some(key) = api_key {
            let masked = mask_key(key);
            if !self.summary.api_keys.iter().any(|k| k.masked == masked) {
                self.summary.api_keys.push(MaskedKey { masked, key_type: classify_key(key) });
            }
        }
        if let Some(model) = model {
            push_unique(&mut self.summary.models, model.to_string());
        }
        if let Some(org_id) = org_id {
            push_unique(&mut self.summary.org_ids, org_id.to_string());
        }
        if let Some(ua) = user_agent {
            push_unique(&mut self.summary.user_agents, ua.to_string());
        }
        push_unique(&mut self.summary.domains, domain.to_string());
        for tool in tools {
            if !self.summary.tools.iter().any(|t| t.name == tool.name) {
                self.summary.tools.push(tool.clone());
            }
        }

        self.intercepts.push(record);
    }
}

fn push_unique(set: &mut Vec<String>, value: String) {
    if !set.contains(&value) {
        set.push(value);
    }
}

pub fn dir(forensics_dir: &Path) -> PathBuf {
    forensics_dir.join(DIR_NAME)
}

pub fn path(forensics_dir: &Path, session_id: &str) -> PathBuf {
    dir(forensics_dir).join(format!("{session_id}.json"))
}

/// Read one session's dossier, `None` if absent or malformed.
pub fn read(forensics_dir: &Path, session_id: &str) -> Option<IntelDossier> {
    let raw = std::fs::read_to_string(path(forensics_dir, session_id)).ok()?;
    serde_json::from_str(&raw).ok()
}

pub fn write(forensics_dir: &Path, dossier: &IntelDossier) -> std::io::Result<()> {
    std::fs::create_dir_all(dir(forensics_dir))?;
    let json = serde_json::to_vec_pretty(dossier)?;
    atomic_write(&path(forensics_dir, &dossier.session_id), &json)
}

/// Enumerate every dossier on disk, skipping unreadable or malformed files.
pub fn list(forensics_dir: &Path) -> Vec<IntelDossier> {
    let entries = match std::fs::read_dir(dir(forensics_dir)) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let raw = std::fs::read_to_string(entry.path()).ok()?;
            serde_json::from_str(&raw).ok()
        })
        .collect()
}

/// Deduplicated set of domains across every dossier, used by diagnostics.
pub fn all_domains(forensics_dir: &Path) -> HashSet<String> {
    list(forensics_dir)
        .into_iter()
        .flat_map(|d| d.summary.domains)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_key_recognizes_known_prefixes() {
        assert_eq!(classify_key("sk-proj-abc123"), KeyType::OpenaiProject);
        assert_eq!(classify_key("sk-ant-abc123"), KeyType::Anthropic);
        assert_eq!(classify_key("sk-abc123"), KeyType::OpenaiLegacy);
        assert_eq!(classify_key("xyz"), KeyType::Unknown);
    }

    #[test]
    fn mask_key_keeps_prefix_and_suffix_only() {
        let masked = mask_key("sk-proj-abcdefgh1234");
        assert!(masked.starts_with("sk-pro"));
        assert!(masked.ends_with("1234"));
        assert!(!masked.contains("abcdefgh"));
    }

    #[test]
    fn record_intercept_deduplicates_and_counts() {
        let mut dossier = IntelDossier::new("LBX-20260101-001");
        dossier.record_intercept(
            serde_json::json!({"path": "/v1/chat/completions"}),
            Some("sk-proj-abcdefgh1234"),
            Some("gpt-4"),
            None,
            Some("curl/8.0"),
            &[],
            "api.openai.com",
        );
        dossier.record_intercept(
            serde_json::json!({"path": "/v1/chat/completions"}),
            Some("sk-proj-abcdefgh1234"),
            Some("gpt-4"),
            None,
            Some("curl/8.0"),
            &[],
            "api.openai.com",
        );

        assert_eq!(dossier.summary.intercept_count, 2);
        assert_eq!(dossier.summary.api_keys.len(), 1);
        assert_eq!(dossier.summary.models.len(), 1);
        assert_eq!(dossier.intercepts.len(), 2);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut dossier = IntelDossier::new("LBX-20260101-002");
        dossier.record_intercept(
            serde_json::json!({}),
            None,
            Some("claude-3"),
            None,
            None,
            &[],
            "api.anthropic.com",
        );
        write(dir.path(), &dossier).unwrap();

        let read_back = read(dir.path(), "LBX-20260101-002").unwrap();
        assert_eq!(read_back.summary.models, vec!["claude-3".to_string()]);
    }

    #[test]
    fn list_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(self::dir(dir.path())).unwrap();
        std::fs::write(self::dir(dir.path()).join("bad.json"), "not json").unwrap();
        let dossier = IntelDossier::new("LBX-20260101-003");
        write(dir.path(), &dossier).unwrap();

        let all = list(dir.path());
        assert_eq!(all.len(), 1);
    }
}
