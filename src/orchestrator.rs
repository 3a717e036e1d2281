//! Orchestrator state machine core (§4.7).
//!
//! Owns the session registry and ties together the container manager,
//! layer controllers, routing fabric, and forensic log. Events are
//! dispatched one at a time from [`crate::watcher::EventWatcher`] — the
//! single-dispatch discipline (§5, §9) is enforced here by funneling every
//! `on_auth`/`on_escalation` call through `&self` methods that only ever run
//! on the watcher's single dispatch task, never concurrently with each
//! other for the same session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::Config;
use crate::container_manager::{self, ContainerManager, SpawnRequest};
use crate::forensics::ForensicWriter;
use crate::layers::{BlindfoldController, MinotaurController, PuppeteerController, ThresholdController};
use crate::mitm::ca::CertificateAuthority;
use crate::routing::RoutingFabric;
use crate::session::{ServiceTag, Session, SessionRegistry};
use crate::watcher::{AuthEvent, EscalationEvent, WatcherCallbacks};

const REMOVAL_GRACE: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    config: Config,
    registry: SessionRegistry,
    container_manager: ContainerManager,
    l1: ThresholdController,
    l2: MinotaurController,
    l3: BlindfoldController,
    l4: PuppeteerController,
    routing: RoutingFabric,
    forensics: ForensicWriter,
    ca: Arc<CertificateAuthority>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        container_manager: ContainerManager,
        forensics: ForensicWriter,
        ca: Arc<CertificateAuthority>,
    ) -> Self {
        let routing = RoutingFabric::new(&config.forensics_dir);
        let l2 = MinotaurController::new(config.contradiction.clone());
        let l3 = BlindfoldController::new(config.l3.activation);
        let l4 = PuppeteerController::new(config.l4.proxy_ip.clone(), config.forensics_dir.clone());

        Self {
            config,
            registry: SessionRegistry::new("LBX"),
            container_manager,
            l1: ThresholdController::new(),
            l2,
            l3,
            l4,
            routing,
            forensics,
            ca,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn forensics_dir_str(&self) -> String {
        self.config.forensics_dir.to_string_lossy().into_owned()
    }

    /// §4.7 on **auth**.
    pub async fn on_auth(&self, src_ip: &str, service: ServiceTag, _username: &str) {
        if self.registry.get_by_ip(src_ip).is_some() {
            // an src-ip with a live session is a no-op (§8 boundary behavior)
            return;
        }

        if !self.l1.admit(src_ip, service) {
            return;
        }

        let session = self.registry.create(src_ip, service);

        let l2_config = self.l2.initial_config(&session);
        let selection = self.l2.select(l2_config, session.depth);

        let l3_active = self.l3.should_activate(&session, false);
        let dns_overrides = self.l4.dns_overrides();
        // sessions are always proxy-enrolled, even in passive mode (§9 ambiguity note)
        let l4_active = true;

        if l3_active {
            self.registry.mutate(&session.id, |s| s.set_l3_active());
        }
        if l4_active {
            self.registry.mutate(&session.id, |s| s.set_l4_active());
        }

        self.forensics.record_session_event(
            &session.id,
            0,
            "connection",
            json!({"src_ip": src_ip, "service": service.as_str()}),
        );

        let req = SpawnRequest {
            session: &session,
            contradictions: &selection,
            l3_active,
            l4_active,
            dns_overrides: &dns_overrides,
            network: self.config.network.name.clone(),
            forensics_volume: Some("labyrinth-forensics".to_string()),
            forensics_dir: self.forensics_dir_str(),
            proxy_ip: self.config.l4.proxy_ip.clone(),
            proxy_port: self.config.l4.proxy_port,
            template_image: self.config.session_template_image.clone(),
        };

        let spawned = self.container_manager.spawn(req).await;

        let (Some(container_id), Some(container_ip)) = (spawned.container_id, spawned.container_ip) else {
            log::warn!("no container for session {} (spawn failed)", session.id);
            return;
        };

        self.registry.mutate(&session.id, |s| {
            s.container_id = Some(container_id.clone());
            s.container_ip = Some(container_ip.clone());
        });

        if let Err(e) = self.routing.forward_src_ip_to_container_ip(src_ip, &container_ip) {
            log::error!("failed to update forward map for {}: {}", src_ip, e);
        }
        if let Err(e) = self.l4.register(&container_ip, &session.id) {
            log::error!("failed to register proxy session for {}: {}", container_ip, e);
        }

        container_manager::inject_ca_cert(&self.container_manager, &container_id, self.ca.cert_pem()).await;

        self.forensics.record_session_event(
            &session.id,
            1,
            "container_spawned",
            json!({"depth": session.depth, "l3_active": l3_active}),
        );
    }

    /// §4.7 on **escalation**.
    pub async fn on_escalation(&self, session_id: &str, _escalation_type: &str) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };

        self.forensics.record_session_event(session_id, 2, "escalation_detected", json!({}));

        if session.depth >= self.config.contradiction.max_container_depth {
            self.activate_l3(&session).await;
            return;
        }

        let new_depth = session.depth + 1;
        let Some(session) = self.registry.mutate(session_id, |s| s.bump_depth()) else {
            return;
        };

        let l2_config = self.l2.next_config(&session, new_depth);
        let selection = self.l2.select(l2_config, new_depth);

        let mut l3_newly_activated = false;
        let mut l3_active = session.l3_active;
        if !session.l3_active && self.l3.should_activate(&session, true) {
            self.registry.mutate(session_id, |s| s.set_l3_active());
            l3_active = true;
            l3_newly_activated = true;
        }

        let dns_overrides = self.l4.dns_overrides();
        let req = SpawnRequest {
            session: &session,
            contradictions: &selection,
            l3_active,
            l4_active: true,
            dns_overrides: &dns_overrides,
            network: self.config.network.name.clone(),
            forensics_volume: Some("labyrinth-forensics".to_string()),
            forensics_dir: self.forensics_dir_str(),
            proxy_ip: self.config.l4.proxy_ip.clone(),
            proxy_port: self.config.l4.proxy_port,
            template_image: self.config.session_template_image.clone(),
        };

        let spawned = self.container_manager.spawn(req).await;
        let (Some(new_container_id), Some(new_container_ip)) = (spawned.container_id, spawned.container_ip) else {
            log::warn!("escalation spawn failed for session {}", session_id);
            return;
        };

        if let Some(old_container_id) = session.container_id.clone() {
            self.container_manager.schedule_removal(old_container_id, REMOVAL_GRACE);
        }

        self.registry.mutate(session_id, |s| {
            s.container_id = Some(new_container_id.clone());
            s.container_ip = Some(new_container_ip.clone());
        });

        if let Err(e) = self
            .routing
            .forward_src_ip_to_container_ip(&session.src_ip, &new_container_ip)
        {
            log::error!("failed to update forward map for {}: {}", session.src_ip, e);
        }
        if let Err(e) = self.l4.register(&new_container_ip, session_id) {
            log::error!("failed to register proxy session for {}: {}", new_container_ip, e);
        }

        container_manager::inject_ca_cert(&self.container_manager, &new_container_id, self.ca.cert_pem()).await;

        if l3_newly_activated {
            self.l3.activate(&self.container_manager, &new_container_id).await;
            self.forensics.record_session_event(session_id, 3, "blindfold_activated", json!({}));
            self.l4
                .activate(&self.container_manager, &new_container_id, self.config.l4.proxy_port)
                .await;
            self.forensics
                .record_session_event(session_id, 4, "proxy_interception_activated", json!({}));
        }

        self.forensics.record_session_event(
            session_id,
            2,
            "depth_increase",
            json!({"new_depth": new_depth}),
        );
    }

    /// `_activate_l3` per §4.7: idempotent, also drives L4 activation.
    async fn activate_l3(&self, session: &Session) {
        if session.l3_active {
            return;
        }

        self.registry.mutate(&session.id, |s| s.set_l3_active());

        let Some(container_id) = session.container_id.clone() else {
            return;
        };

        self.l3.activate(&self.container_manager, &container_id).await;
        self.forensics.record_session_event(&session.id, 3, "blindfold_activated", json!({}));

        self.l4
            .activate(&self.container_manager, &container_id, self.config.l4.proxy_port)
            .await;
        self.forensics
            .record_session_event(&session.id, 4, "proxy_interception_activated", json!({}));
    }

    /// Session end: timeout sweep or explicit termination (§4.7).
    pub async fn end_session(&self, session_id: &str) {
        let Some(session) = self.registry.remove(session_id) else {
            return;
        };

        if let Err(e) = self.routing.unforward_src_ip(&session.src_ip) {
            log::error!("failed to clear forward map entry for {}: {}", session.src_ip, e);
        }
        if let Some(ip) = &session.container_ip {
            if let Err(e) = self.l4.unregister(ip) {
                log::error!("failed to clear proxy session entry for {}: {}", ip, e);
            }
        }

        if let Some(container_id) = &session.container_id {
            self.container_manager.cleanup(container_id).await;
        }

        let duration_secs = session.created_at.elapsed().as_secs();
        self.forensics.record_session_event(
            session_id,
            0,
            "session_end",
            json!({
                "duration_secs": duration_secs,
                "final_depth": session.depth,
                "command_count": session.command_count,
                "l3_activated": session.l3_active,
            }),
        );
    }

    /// Periodic timeout sweep, called from the main loop. Finds expired
    /// sessions by inspection rather than delegating removal to the registry,
    /// so each one still gets its full `end_session` cleanup (routing,
    /// container, forensic record).
    pub async fn sweep_expired(&self) {
        let timeout = Duration::from_secs(self.config.session.timeout_secs);
        let expired_ids: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|s| s.created_at.elapsed() > timeout)
            .map(|s| s.id)
            .collect();

        for id in expired_ids {
            log::info!("session {} expired by timeout sweep", id);
            self.end_session(&id).await;
        }
    }

    /// Shutdown: stop accepting new events (handled by the caller dropping
    /// the watcher), drain scheduled removals naturally, and reap everything.
    pub async fn shutdown(&self) {
        let reaped = self.container_manager.cleanup_all().await;
        log::info!("shutdown: reaped {} session containers", reaped);
    }

    /// §4.9 `POST /api/reset`: reap every session-labeled container, drop
    /// every live session from the registry, and purge session JSONL, auth
    /// events, and http events. Intel dossiers and the L4 mode file are left
    /// untouched — neither is named by the reset operation in §4.9.
    pub async fn reset(&self) -> ResetReport {
        let mut report = ResetReport::default();

        report.containers_reaped = self.container_manager.cleanup_all().await;

        let live_sessions = self.registry.list();
        self.registry.sweep(Duration::ZERO);
        for session in live_sessions {
            if let Err(e) = self.routing.unforward_src_ip(&session.src_ip) {
                report.errors.push(format!("routing cleanup for {}: {}", session.id, e));
            }
            if let Some(ip) = &session.container_ip {
                if let Err(e) = self.l4.unregister(ip) {
                    report.errors.push(format!("proxy map cleanup for {}: {}", session.id, e));
                }
            }
        }

        report.sessions_purged = purge_jsonl_dir(&self.config.forensics_dir.join("sessions"), &mut report.errors);
        purge_file(&self.config.forensics_dir.join("auth_events.jsonl"), &mut report.errors);
        purge_file(&self.config.forensics_dir.join("http.jsonl"), &mut report.errors);

        report
    }
}

#[derive(Debug, Default)]
pub struct ResetReport {
    pub containers_reaped: usize,
    pub sessions_purged: usize,
    pub errors: Vec<String>,
}

fn purge_jsonl_dir(dir: &std::path::Path, errors: &mut Vec<String>) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return 0,
    };

    let mut purged = 0;
    for entry in entries.flatten() {
        match std::fs::remove_file(entry.path()) {
            Ok(()) => purged += 1,
            Err(e) => errors.push(format!("{}: {}", entry.path().display(), e)),
        }
    }
    purged
}

fn purge_file(path: &std::path::Path, errors: &mut Vec<String>) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            errors.push(format!("{}: {}", path.display(), e));
        }
    }
}

#[async_trait::async_trait]
impl WatcherCallbacks for Orchestrator {
    async fn on_auth(&self, event: AuthEvent) {
        let Some(service) = ServiceTag::parse(&event.service) else {
            log::warn!("unknown service tag in auth event: {}", event.service);
            return;
        };
        Orchestrator::on_auth(self, &event.src_ip, service, &event.username).await;
    }

    async fn on_escalation(&self, event: EscalationEvent) {
        Orchestrator::on_escalation(self, &event.session_id, &event.escalation_type).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;
    use std::sync::Arc as StdArc;

    fn make_orchestrator(dir: &std::path::Path) -> Orchestrator {
        let mut config = Config::default();
        config.forensics_dir = dir.to_path_buf();
        config.contradiction.max_container_depth = 5;

        let runtime: StdArc<dyn crate::runtime::ContainerRuntime> = StdArc::new(
            MockRuntime::new()
                .with_image(&config.session_template_image)
                .with_network(&config.network.name, &config.network.subnet),
        );
        let manager = ContainerManager::new(runtime);
        let (forensics, fut) = crate::forensics::create(dir.to_path_buf(), config.siem.clone());
        tokio::spawn(fut);
        let ca = StdArc::new(crate::mitm::ca::CertificateAuthority::load_or_generate(dir).unwrap());

        Orchestrator::new(config, manager, forensics, ca)
    }

    #[tokio::test]
    async fn cold_start_creates_exactly_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let orch = make_orchestrator(dir.path());

        orch.on_auth("10.0.0.1", ServiceTag::Ssh, "root").await;

        assert_eq!(orch.registry().list().len(), 1);
        let session = orch.registry().list().into_iter().next().unwrap();
        assert_eq!(session.depth, 1);
        assert!(session.container_id.is_some());
    }

    #[tokio::test]
    async fn second_auth_for_same_ip_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let orch = make_orchestrator(dir.path());

        orch.on_auth("10.0.0.1", ServiceTag::Ssh, "root").await;
        orch.on_auth("10.0.0.1", ServiceTag::Ssh, "root").await;

        assert_eq!(orch.registry().list().len(), 1);
    }

    #[tokio::test]
    async fn escalation_ladder_increments_depth_and_activates_l3_at_three() {
        let dir = tempfile::tempdir().unwrap();
        let orch = make_orchestrator(dir.path());
        orch.on_auth("10.0.0.1", ServiceTag::Ssh, "root").await;
        let session_id = orch.registry().list()[0].id.clone();

        // starting depth is 1 (§3); three escalations walk new_depth = 2, 3, 4
        orch.on_escalation(&session_id, "bait").await;
        orch.on_escalation(&session_id, "bait").await;
        let mid = orch.registry().get(&session_id).unwrap();
        assert_eq!(mid.depth, 3);
        assert!(mid.l3_active, "L3 activates on the transition to depth 3");

        orch.on_escalation(&session_id, "bait").await;

        let session = orch.registry().get(&session_id).unwrap();
        assert_eq!(session.depth, 4);
        assert!(session.l3_active);
    }

    #[tokio::test]
    async fn cap_reached_does_not_increment_depth() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = make_orchestrator(dir.path());
        orch.config.contradiction.max_container_depth = 2;

        orch.on_auth("10.0.0.1", ServiceTag::Ssh, "root").await;
        let session_id = orch.registry().list()[0].id.clone();

        orch.on_escalation(&session_id, "bait").await;
        orch.on_escalation(&session_id, "bait").await;
        orch.on_escalation(&session_id, "bait").await;

        let session = orch.registry().get(&session_id).unwrap();
        assert_eq!(session.depth, 2);
        assert!(session.l3_active);
    }

    #[tokio::test]
    async fn end_session_removes_from_registry() {
        let dir = tempfile::tempdir().unwrap();
        let orch = make_orchestrator(dir.path());
        orch.on_auth("10.0.0.1", ServiceTag::Ssh, "root").await;
        let session_id = orch.registry().list()[0].id.clone();

        orch.end_session(&session_id).await;
        assert!(orch.registry().get(&session_id).is_none());
    }
}
