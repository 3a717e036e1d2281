//! Retention manager (§4.11): periodic purge of aged session and prompt
//! files by category-specific windows, keyed on modification time.
//! Deletion errors are logged but never fatal (§7).

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::config::RetentionConfig;

#[derive(Debug, Default)]
pub struct PurgeReport {
    pub sessions_purged: usize,
    pub prompts_purged: usize,
}

/// Runs one retention sweep over the forensics directory's `sessions/` and
/// `prompts/` subdirectories.
pub fn sweep(forensics_dir: &Path, config: &RetentionConfig) -> PurgeReport {
    let mut report = PurgeReport::default();

    report.sessions_purged = purge_dir(
        &forensics_dir.join("sessions"),
        Duration::from_secs(config.fingerprints_days * 86400),
    );
    report.prompts_purged = purge_dir(
        &forensics_dir.join("prompts"),
        Duration::from_secs(config.credentials_days * 86400),
    );

    report
}

fn purge_dir(dir: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return 0,
    };

    let now = SystemTime::now();
    let mut purged = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                log::warn!("retention: failed to stat {}: {}", path.display(), e);
                continue;
            }
        };

        let modified = match metadata.modified() {
            Ok(m) => m,
            Err(e) => {
                log::warn!("retention: no mtime for {}: {}", path.display(), e);
                continue;
            }
        };

        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > max_age {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("retention: failed to remove {}: {}", path.display(), e);
                continue;
            }
            purged += 1;
        }
    }

    purged
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};

    fn config() -> RetentionConfig {
        RetentionConfig { credentials_days: 14, fingerprints_days: 90 }
    }

    #[test]
    fn purges_file_older_than_window_preserves_recent() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = dir.path().join("sessions");
        std::fs::create_dir_all(&sessions).unwrap();

        let old_file = sessions.join("old.jsonl");
        std::fs::write(&old_file, "x").unwrap();
        let old_time = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(100 * 86400));
        set_file_mtime(&old_file, old_time).unwrap();

        let recent_file = sessions.join("recent.jsonl");
        std::fs::write(&recent_file, "y").unwrap();
        let recent_time = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(1 * 86400));
        set_file_mtime(&recent_file, recent_time).unwrap();

        let report = sweep(dir.path(), &config());
        assert_eq!(report.sessions_purged, 1);
        assert!(!old_file.exists());
        assert!(recent_file.exists());
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let report = sweep(dir.path(), &config());
        assert_eq!(report.sessions_purged, 0);
        assert_eq!(report.prompts_purged, 0);
    }
}
