//! L4 mode file (§3, §4.9, §4.8): single-field JSON on the shared volume
//! holding the current interception mode. Written by the control API;
//! polled by the MITM addon on every intercepted request (hot-reload).
//! An unknown or malformed mode string is treated as `passive`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::L4Mode;
use crate::util::atomic_write;

const FILE_NAME: &str = "l4_mode.json";

#[derive(Debug, Serialize, Deserialize)]
struct ModeFile {
    mode: String,
    updated_at: chrono::DateTime<Utc>,
}

pub fn path(forensics_dir: &Path) -> PathBuf {
    forensics_dir.join(FILE_NAME)
}

/// Read the current mode, falling back to `passive` on a missing or
/// malformed file, or an unrecognized mode string (§8 boundary behavior).
pub fn read(forensics_dir: &Path) -> L4Mode {
    let raw = match std::fs::read_to_string(path(forensics_dir)) {
        Ok(raw) => raw,
        Err(_) => return L4Mode::Passive,
    };
    match serde_json::from_str::<ModeFile>(&raw) {
        Ok(m) => L4Mode::parse(&m.mode).unwrap_or(L4Mode::Passive),
        Err(_) => L4Mode::Passive,
    }
}

pub fn write(forensics_dir: &Path, mode: L4Mode) -> std::io::Result<()> {
    let file = ModeFile {
        mode: mode.as_str().to_string(),
        updated_at: Utc::now(),
    };
    let json = serde_json::to_vec(&file)?;
    atomic_write(&path(forensics_dir), &json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_defaults_to_passive() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read(dir.path()), L4Mode::Passive);
    }

    #[test]
    fn malformed_file_defaults_to_passive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(path(dir.path()), "not json").unwrap();
        assert_eq!(read(dir.path()), L4Mode::Passive);
    }

    #[test]
    fn unknown_mode_string_defaults_to_passive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            path(dir.path()),
            r#"{"mode":"bogus","updated_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(read(dir.path()), L4Mode::Passive);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), L4Mode::Neutralize).unwrap();
        assert_eq!(read(dir.path()), L4Mode::Neutralize);
    }
}
