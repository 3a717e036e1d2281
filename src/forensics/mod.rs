//! Forensic event log (§2, §3, §6, §9).
//!
//! Append-only JSON-lines writer: one file per session at
//! `{FORENSICS}/sessions/{session_id}.jsonl`, plus the two global streams
//! `auth_events.jsonl` and `http.jsonl`. The channel + background-task shape
//! is grounded in the teacher's `audit/writer.rs`, but unlike the teacher's
//! SQLite sink, each record here is opened, written, and closed individually
//! rather than batched — the design note's explicit durability-over-throughput
//! trade, and there is no persistent database to batch into (a Non-goal).

pub mod siem;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::SiemConfig;

const CHANNEL_CAPACITY: usize = 4096;

/// Errors surfaced by forensic/intel-dossier file access, composed into
/// [`crate::error::LabyrinthError`] at the binary boundary.
#[derive(Debug, thiserror::Error)]
pub enum ForensicsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Closed set of event tags produced by the core (§6).
pub const SESSION_EVENT_TAGS: &[&str] = &[
    "connection",
    "container_spawned",
    "container_ready",
    "depth_increase",
    "escalation_detected",
    "blindfold_activated",
    "proxy_interception_activated",
    "api_intercepted",
    "api_response",
    "session_end",
];

#[derive(Debug, Clone, Serialize)]
pub struct ForensicEvent {
    pub timestamp: DateTime<Utc>,
    /// Empty for auth/http stream entries that precede session creation.
    pub session_id: String,
    pub layer: u8,
    pub event: String,
    pub data: Value,
}

impl ForensicEvent {
    pub fn new(session_id: impl Into<String>, layer: u8, event: impl Into<String>, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            layer,
            event: event.into(),
            data,
        }
    }
}

enum Destination {
    Session(String),
    AuthEvents,
    Http,
}

struct QueuedEvent {
    destination: Destination,
    record: ForensicEvent,
}

/// Cheaply cloneable handle for recording forensic events. `record()` is
/// non-blocking: entries are dropped (and logged) if the channel is full,
/// matching the teacher's `AuditWriter::record` discipline.
#[derive(Clone)]
pub struct ForensicWriter {
    tx: mpsc::Sender<QueuedEvent>,
}

impl ForensicWriter {
    pub fn record_session_event(&self, session_id: &str, layer: u8, event: &str, data: Value) {
        let record = ForensicEvent::new(session_id, layer, event, data);
        self.enqueue(Destination::Session(session_id.to_string()), record);
    }

    pub fn record_auth_event(&self, event: Value) {
        let record = ForensicEvent::new("", 0, "auth", event);
        self.enqueue(Destination::AuthEvents, record);
    }

    pub fn record_http_event(&self, event: Value) {
        let record = ForensicEvent::new("", 0, "http", event);
        self.enqueue(Destination::Http, record);
    }

    fn enqueue(&self, destination: Destination, record: ForensicEvent) {
        if self
            .tx
            .try_send(QueuedEvent { destination, record })
            .is_err()
        {
            log::warn!("forensic event channel full, event dropped: {}", record.event);
        }
    }
}

/// Create the background writer and return the handle plus the future the
/// caller spawns on the orchestrator's runtime.
pub fn create(
    forensics_dir: PathBuf,
    siem: SiemConfig,
) -> (ForensicWriter, impl std::future::Future<Output = ()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer = ForensicWriter { tx };
    let siem_client = siem::SiemClient::new(siem);
    let future = run(rx, forensics_dir, siem_client);
    (writer, future)
}

async fn run(mut rx: mpsc::Receiver<QueuedEvent>, forensics_dir: PathBuf, siem: siem::SiemClient) {
    if let Err(e) = tokio::fs::create_dir_all(forensics_dir.join("sessions")).await {
        log::error!("failed to create sessions forensics directory: {}", e);
    }

    while let Some(queued) = rx.recv().await {
        let path = match &queued.destination {
            Destination::Session(id) => forensics_dir.join("sessions").join(format!("{id}.jsonl")),
            Destination::AuthEvents => forensics_dir.join("auth_events.jsonl"),
            Destination::Http => forensics_dir.join("http.jsonl"),
        };

        if let Err(e) = append_record(&path, &queued.record) {
            log::error!("forensic write failed for {}: {}", path.display(), e);
            continue;
        }

        siem.push(&queued.record);
    }
}

/// Opens, writes, and closes a single JSON record terminated by newline —
/// never a partial write (§5): write the whole line or fail.
fn append_record(path: &Path, record: &ForensicEvent) -> std::io::Result<()> {
    use std::io::Write;

    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(&line)
}
