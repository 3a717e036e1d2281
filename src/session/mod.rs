//! Session registry (§4.1).
//!
//! Thread-safe mapping {session-id → Session} and {src-ip → Session},
//! guarded by a single lock. All operations are point-in-time; there are
//! no waiters. Mutation of a live `Session`'s depth/L3/L4 fields happens
//! exclusively through the orchestrator's dispatch thread — the registry
//! itself only hands out the session for in-place mutation under the lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Originating service tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTag {
    Ssh,
    Http,
}

impl ServiceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceTag::Ssh => "ssh",
            ServiceTag::Http => "http",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ssh" => Some(ServiceTag::Ssh),
            "http" => Some(ServiceTag::Http),
            _ => None,
        }
    }
}

/// One attacker's engagement (§3 Data Model).
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub src_ip: String,
    pub service: ServiceTag,
    pub container_id: Option<String>,
    pub container_ip: Option<String>,
    pub depth: u32,
    #[serde(skip)]
    pub created_at: Instant,
    pub created_at_utc: DateTime<Utc>,
    pub command_count: u64,
    pub l3_active: bool,
    pub l4_active: bool,
}

impl Session {
    fn new(id: String, src_ip: String, service: ServiceTag) -> Self {
        Self {
            id,
            src_ip,
            service,
            container_id: None,
            container_ip: None,
            depth: 1,
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
            command_count: 0,
            l3_active: false,
            l4_active: false,
        }
    }

    /// Depth only ever increases (I-invariant, §3/§8).
    pub fn bump_depth(&mut self) {
        self.depth += 1;
    }

    /// `l3_active` is monotone non-decreasing: once true, never false.
    pub fn set_l3_active(&mut self) {
        self.l3_active = true;
    }

    /// `l4_active` is monotone non-decreasing: once true, never false.
    pub fn set_l4_active(&mut self) {
        self.l4_active = true;
    }
}

struct Inner {
    by_id: HashMap<String, Session>,
    by_ip: HashMap<String, String>, // src_ip -> session_id
    counters: HashMap<String, u32>, // date prefix -> next counter
}

/// Thread-safe session registry guarded by one mutex (§4.1, §5).
pub struct SessionRegistry {
    id_prefix: String,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new(id_prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: id_prefix.into(),
            inner: Mutex::new(Inner {
                by_id: HashMap::new(),
                by_ip: HashMap::new(),
                counters: HashMap::new(),
            }),
        }
    }

    /// Mint a new session id `{PREFIX}-{YYYY-MMDD}-{counter:03d}`, counter
    /// monotone per date prefix for the process lifetime.
    fn mint_id(&self, inner: &mut Inner) -> String {
        let date = Utc::now().format("%Y-%m%d").to_string();
        let counter = inner.counters.entry(date.clone()).or_insert(0);
        *counter += 1;
        format!("{}-{}-{:03}", self.id_prefix, date, counter)
    }

    /// Create a new session for `src_ip`/`service`. Caller (orchestrator)
    /// is responsible for checking `get_by_ip` first so a second live
    /// session is never created for an already-live src-ip.
    pub fn create(&self, src_ip: &str, service: ServiceTag) -> Session {
        let mut inner = self.inner.lock().unwrap();
        let id = self.mint_id(&mut inner);
        let session = Session::new(id.clone(), src_ip.to_string(), service);
        inner.by_ip.insert(src_ip.to_string(), id.clone());
        inner.by_id.insert(id, session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.lock().unwrap().by_id.get(id).cloned()
    }

    pub fn get_by_ip(&self, ip: &str) -> Option<Session> {
        let inner = self.inner.lock().unwrap();
        let id = inner.by_ip.get(ip)?;
        inner.by_id.get(id).cloned()
    }

    /// Apply `f` to the session in place under the lock and return the
    /// updated copy, or `None` if unknown. This is the only path through
    /// which depth/L3/L4 are mutated, keeping updates atomic with respect
    /// to concurrent reads.
    pub fn mutate<F>(&self, id: &str, f: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.by_id.get_mut(id)?;
        f(session);
        Some(session.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.by_id.remove(id)?;
        inner.by_ip.remove(&session.src_ip);
        Some(session)
    }

    pub fn list(&self) -> Vec<Session> {
        self.inner.lock().unwrap().by_id.values().cloned().collect()
    }

    /// Remove every session whose age exceeds `timeout`, returning the
    /// removed ids. `timeout = Duration::ZERO` removes every session.
    pub fn sweep(&self, timeout: Duration) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .by_id
            .values()
            .filter(|s| now.saturating_duration_since(s.created_at) > timeout || timeout.is_zero())
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = inner.by_id.remove(id) {
                inner.by_ip.remove(&session.src_ip);
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_mints_monotone_ids() {
        let reg = SessionRegistry::new("LBX");
        let s1 = reg.create("10.0.0.1", ServiceTag::Ssh);
        let s2 = reg.create("10.0.0.2", ServiceTag::Ssh);
        assert_ne!(s1.id, s2.id);
        assert!(s2.id.as_str() > s1.id.as_str());
    }

    #[test]
    fn get_by_ip_round_trips() {
        let reg = SessionRegistry::new("LBX");
        let created = reg.create("10.0.0.1", ServiceTag::Ssh);
        let found = reg.get_by_ip("10.0.0.1").unwrap();
        assert_eq!(found.id, created.id);
    }

    #[test]
    fn mutate_bumps_depth_monotonically() {
        let reg = SessionRegistry::new("LBX");
        let s = reg.create("10.0.0.1", ServiceTag::Ssh);
        reg.mutate(&s.id, |s| s.bump_depth()).unwrap();
        let after = reg.get(&s.id).unwrap();
        assert_eq!(after.depth, 2);
    }

    #[test]
    fn l3_l4_flags_never_reset() {
        let reg = SessionRegistry::new("LBX");
        let s = reg.create("10.0.0.1", ServiceTag::Ssh);
        reg.mutate(&s.id, |s| s.set_l3_active()).unwrap();
        let after = reg.get(&s.id).unwrap();
        assert!(after.l3_active);
    }

    #[test]
    fn sweep_with_zero_timeout_removes_all() {
        let reg = SessionRegistry::new("LBX");
        reg.create("10.0.0.1", ServiceTag::Ssh);
        reg.create("10.0.0.2", ServiceTag::Ssh);
        let removed = reg.sweep(Duration::ZERO);
        assert_eq!(removed.len(), 2);
        assert!(reg.list().is_empty());
    }

    #[test]
    fn remove_clears_both_indices() {
        let reg = SessionRegistry::new("LBX");
        let s = reg.create("10.0.0.1", ServiceTag::Ssh);
        reg.remove(&s.id);
        assert!(reg.get(&s.id).is_none());
        assert!(reg.get_by_ip("10.0.0.1").is_none());
    }
}
