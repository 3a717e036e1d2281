//! SIEM push client (§2, SUPPLEMENTED FEATURES): fans out forensic events to
//! an external collector over HTTP. Mirrors the teacher's pattern of firing
//! a detached transient task per notification rather than threading the SIEM
//! endpoint's latency into the dispatch path — a push failure is logged and
//! never affects the main loop (§7).

use serde::Serialize;

use crate::config::SiemConfig;
use crate::forensics::ForensicEvent;

#[derive(Clone)]
pub struct SiemClient {
    config: SiemConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct SiemAlert<'a> {
    prefix: &'a str,
    event: &'a ForensicEvent,
}

impl SiemClient {
    pub fn new(config: SiemConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Fire-and-forget push. No-op if SIEM is disabled or no endpoint is
    /// configured.
    pub fn push(&self, event: &ForensicEvent) {
        if !self.config.enabled {
            return;
        }
        let Some(endpoint) = self.config.endpoint.clone() else {
            return;
        };

        let http = self.http.clone();
        let prefix = self.config.alert_prefix.clone();
        let event = event.clone();

        tokio::spawn(async move {
            let alert = SiemAlert {
                prefix: &prefix,
                event: &event,
            };
            if let Err(e) = http.post(&endpoint).json(&alert).send().await {
                log::warn!("SIEM push failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disabled_config_is_inert() {
        let client = SiemClient::new(SiemConfig {
            enabled: false,
            endpoint: Some("http://127.0.0.1:1/siem".to_string()),
            alert_prefix: "LABYRINTH".to_string(),
        });
        let event = ForensicEvent::new("LBX-20260101-001", 0, "connection", json!({}));
        client.push(&event); // must not panic even with an unreachable endpoint
    }

    #[test]
    fn missing_endpoint_is_inert() {
        let client = SiemClient::new(SiemConfig {
            enabled: true,
            endpoint: None,
            alert_prefix: "LABYRINTH".to_string(),
        });
        let event = ForensicEvent::new("LBX-20260101-001", 0, "connection", json!({}));
        client.push(&event);
    }
}
