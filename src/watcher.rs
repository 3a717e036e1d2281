//! Event watcher (§4.5).
//!
//! Tails `auth_events.jsonl` and `escalation_events.jsonl` in the forensics
//! directory: tracks the last byte offset read per file, and on every
//! filesystem notification reads from that offset to EOF, splitting on
//! newline and dispatching each parsed record to the orchestrator's auth or
//! escalation callback. Malformed lines are skipped with a warning; the
//! offset always advances to the file's new size regardless. Grounded in the
//! teacher's `plugin_manager::dev_watcher` notify + debounce pattern,
//! generalized from "rebuild on any change" to "parse appended lines."

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

pub const AUTH_EVENTS_FILE: &str = "auth_events.jsonl";
pub const ESCALATION_EVENTS_FILE: &str = "escalation_events.jsonl";

#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub src_ip: String,
    pub service: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct EscalationEvent {
    pub session_id: String,
    pub escalation_type: String,
}

#[async_trait::async_trait]
pub trait WatcherCallbacks: Send + Sync {
    async fn on_auth(&self, event: AuthEvent);
    async fn on_escalation(&self, event: EscalationEvent);
}

struct Offsets {
    auth: u64,
    escalation: u64,
}

/// Watches the forensics directory and dispatches parsed records on the
/// orchestrator's dispatch thread via the provided callbacks.
pub struct EventWatcher {
    forensics_dir: PathBuf,
    offsets: Mutex<Offsets>,
    _watcher: RecommendedWatcher,
}

impl EventWatcher {
    /// Start watching. Returns the watcher handle (keep it alive for the
    /// watch to continue) and spawns the dispatch loop.
    pub fn start(forensics_dir: PathBuf, callbacks: Arc<dyn WatcherCallbacks>) -> std::io::Result<Arc<Self>> {
        let (tx, mut rx) = mpsc::channel::<()>(64);

        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_)
                ) {
                    let _ = tx.try_send(());
                }
            }
        })
        .map_err(|e| std::io::Error::other(format!("failed to create file watcher: {e}")))?;

        let mut watcher = watcher;
        watcher
            .watch(&forensics_dir, RecursiveMode::NonRecursive)
            .map_err(|e| std::io::Error::other(format!("failed to watch forensics dir: {e}")))?;

        let this = Arc::new(Self {
            forensics_dir: forensics_dir.clone(),
            offsets: Mutex::new(Offsets { auth: 0, escalation: 0 }),
            _watcher: watcher,
        });

        let dispatcher = this.clone();
        tokio::spawn(async move {
            // pick up anything already present before the watcher started
            dispatcher.poll(&callbacks).await;
            while rx.recv().await.is_some() {
                dispatcher.poll(&callbacks).await;
            }
        });

        Ok(this)
    }

    async fn poll(&self, callbacks: &Arc<dyn WatcherCallbacks>) {
        let auth_path = self.forensics_dir.join(AUTH_EVENTS_FILE);
        let escalation_path = self.forensics_dir.join(ESCALATION_EVENTS_FILE);

        let mut offsets = self.offsets.lock().await;

        let auth_lines = read_new_lines(&auth_path, &mut offsets.auth);
        for line in auth_lines {
            match parse_auth_line(&line) {
                Some(event) => callbacks.on_auth(event).await,
                None => log::warn!("skipping malformed auth event line: {}", line),
            }
        }

        let escalation_lines = read_new_lines(&escalation_path, &mut offsets.escalation);
        for line in escalation_lines {
            match parse_escalation_line(&line) {
                Some(event) => callbacks.on_escalation(event).await,
                None => log::warn!("skipping malformed escalation event line: {}", line),
            }
        }
    }
}

/// Read from `*offset` to EOF, returning non-empty lines, and advance
/// `*offset` to the file's new size regardless of parse outcome. A missing
/// file yields no lines and leaves the offset untouched.
fn read_new_lines(path: &Path, offset: &mut u64) -> Vec<String> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    let len = match file.metadata() {
        Ok(m) => m.len(),
        Err(_) => return Vec::new(),
    };

    if len <= *offset {
        // file truncated or unchanged; reset to current length
        *offset = len;
        return Vec::new();
    }

    if file.seek(SeekFrom::Start(*offset)).is_err() {
        *offset = len;
        return Vec::new();
    }

    let mut buf = String::new();
    if file.read_to_string(&mut buf).is_err() {
        *offset = len;
        return Vec::new();
    }

    *offset = len;
    buf.lines().filter(|l| !l.trim().is_empty()).map(str::to_string).collect()
}

fn parse_auth_line(line: &str) -> Option<AuthEvent> {
    let value: Value = serde_json::from_str(line).ok()?;
    let fields = value.as_object()?;
    Some(AuthEvent {
        src_ip: fields.get("src_ip")?.as_str()?.to_string(),
        service: fields.get("service")?.as_str()?.to_string(),
        username: fields.get("username").and_then(Value::as_str).unwrap_or("").to_string(),
    })
}

fn parse_escalation_line(line: &str) -> Option<EscalationEvent> {
    let value: Value = serde_json::from_str(line).ok()?;
    let fields = value.as_object()?;
    Some(EscalationEvent {
        session_id: fields.get("session_id")?.as_str()?.to_string(),
        escalation_type: fields.get("type").and_then(Value::as_str).unwrap_or("generic").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCallbacks {
        auth_count: AtomicUsize,
        escalation_count: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl WatcherCallbacks for CountingCallbacks {
        async fn on_auth(&self, _event: AuthEvent) {
            self.auth_count.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_escalation(&self, _event: EscalationEvent) {
            self.escalation_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn read_new_lines_advances_offset_past_malformed_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AUTH_EVENTS_FILE);
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "not json").unwrap();
            writeln!(f, r#"{{"src_ip":"10.0.0.1","service":"ssh"}}"#).unwrap();
        }

        let mut offset = 0u64;
        let lines = read_new_lines(&path, &mut offset);
        assert_eq!(lines.len(), 2);
        assert_eq!(offset, std::fs::metadata(&path).unwrap().len());

        assert!(parse_auth_line(&lines[0]).is_none());
        assert!(parse_auth_line(&lines[1]).is_some());
    }

    #[test]
    fn read_new_lines_is_incremental() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AUTH_EVENTS_FILE);
        std::fs::write(&path, "line-one\n").unwrap();

        let mut offset = 0u64;
        let first = read_new_lines(&path, &mut offset);
        assert_eq!(first, vec!["line-one".to_string()]);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "line-two").unwrap();
        drop(f);

        let second = read_new_lines(&path, &mut offset);
        assert_eq!(second, vec!["line-two".to_string()]);
    }

    #[test]
    fn missing_file_yields_no_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AUTH_EVENTS_FILE);
        let mut offset = 0u64;
        assert!(read_new_lines(&path, &mut offset).is_empty());
    }

    #[tokio::test]
    async fn poll_dispatches_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(AUTH_EVENTS_FILE),
            r#"{"src_ip":"10.0.0.1","service":"ssh"}"#.to_string() + "\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(ESCALATION_EVENTS_FILE),
            r#"{"session_id":"LBX-20260101-001","type":"bait"}"#.to_string() + "\n",
        )
        .unwrap();

        let counting = Arc::new(CountingCallbacks {
            auth_count: AtomicUsize::new(0),
            escalation_count: AtomicUsize::new(0),
        });
        let callbacks: Arc<dyn WatcherCallbacks> = counting.clone();

        let watcher = EventWatcher {
            forensics_dir: dir.path().to_path_buf(),
            offsets: Mutex::new(Offsets { auth: 0, escalation: 0 }),
            _watcher: notify::recommended_watcher(|_: Result<Event, notify::Error>| {}).unwrap(),
        };
        watcher.poll(&callbacks).await;

        assert_eq!(counting.auth_count.load(Ordering::SeqCst), 1);
        assert_eq!(counting.escalation_count.load(Ordering::SeqCst), 1);
    }
}
