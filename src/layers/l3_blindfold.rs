//! L3 BlindfoldController — sensory-disruption activation (§4.6).

use crate::config::L3Policy;
use crate::container_manager::ContainerManager;
use crate::session::Session;

const RC_FILES: &[&str] = &["/root/.bashrc", "/root/.profile"];

pub struct BlindfoldController {
    policy: L3Policy,
}

impl BlindfoldController {
    pub fn new(policy: L3Policy) -> Self {
        Self { policy }
    }

    /// True on connect if policy is `on_connect`; true on escalation if
    /// policy is `on_escalation` and depth >= 3; false otherwise.
    pub fn should_activate(&self, session: &Session, is_escalation: bool) -> bool {
        match self.policy {
            L3Policy::OnConnect => !is_escalation,
            L3Policy::OnEscalation => is_escalation && session.depth >= 3,
            L3Policy::Manual => false,
        }
    }

    /// Execs a root command that exports the activation flag and appends the
    /// sourcing line to both rc files. Idempotent: re-running is harmless
    /// since the export/append commands are themselves idempotent in effect
    /// on process state (the shell re-exports on every login anyway).
    pub async fn activate(&self, manager: &ContainerManager, container_id: &str) {
        let mut script = String::from("export LABYRINTH_L3_ACTIVE=1\n");
        for rc in RC_FILES {
            script.push_str(&format!(
                "grep -qxF 'source /usr/local/lib/blindfold.sh' {rc} || echo 'source /usr/local/lib/blindfold.sh' >> {rc}\n"
            ));
        }

        let cmd = vec!["bash".to_string(), "-c".to_string(), script];
        if let Err(e) = manager.exec(container_id, cmd).await {
            log::warn!("L3 activation failed for {}: {}", container_id, e);
        }
    }
}
