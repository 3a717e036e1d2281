//! Entrypoint synthesizer (§4.3).
//!
//! Produces the shell program baked into each new session container.
//! Each contradiction fragment runs inside its own subshell with failures
//! suppressed — the attack surface is the observable *inconsistency*, not
//! every fragment landing (§4.3 fragment invariant).

use base64::Engine;

use crate::contradiction::Contradiction;

pub struct EntrypointSpec<'a> {
    pub session_id: &'a str,
    pub contradictions: &'a [&'a Contradiction],
    pub l3_active: bool,
    pub l4_active: bool,
    pub proxy_ip: String,
    pub proxy_port: u16,
    pub forensics_dir: &'a str,
}

const RC_FILES: &[&str] = &["/root/.bashrc", "/root/.profile"];

/// Render the full shell program described in §4.3, steps 1-10.
pub fn render(spec: &EntrypointSpec) -> String {
    let mut out = String::new();

    // 1. header
    out.push_str("#!/bin/bash\nset -e\n\n");

    // 2. ensure forensics directory
    out.push_str(&format!("mkdir -p {}\n\n", spec.forensics_dir));

    // 3. contradictions, each in its own subshell, failures swallowed
    out.push_str("# contradiction set\n");
    for c in spec.contradictions {
        out.push_str(&format!("# {}: {}\n", c.name, c.description));
        for frag in c.fragments {
            out.push_str(&format!("( {} ) || true\n", frag));
        }
    }
    out.push('\n');

    // 4. bait watcher
    out.push_str("if [ -x /usr/local/bin/bait-watcher ]; then\n");
    out.push_str("  nohup /usr/local/bin/bait-watcher >/dev/null 2>&1 &\n");
    out.push_str("fi\n\n");

    // 5. L3 activation marker + rc sourcing
    if spec.l3_active {
        out.push_str("export LABYRINTH_L3_ACTIVE=1\n");
        for rc in RC_FILES {
            out.push_str(&format!(
                "echo 'source /usr/local/lib/blindfold.sh' >> {}\n",
                rc
            ));
        }
        out.push('\n');
    }

    // 6. L4 proxy env vars, exported and persisted
    if spec.l4_active {
        let proxy_url = format!("http://{}:{}", spec.proxy_ip, spec.proxy_port);
        for var in ["http_proxy", "https_proxy", "HTTP_PROXY", "HTTPS_PROXY"] {
            out.push_str(&format!("export {}={}\n", var, proxy_url));
        }
        for rc in RC_FILES {
            for var in ["http_proxy", "https_proxy", "HTTP_PROXY", "HTTPS_PROXY"] {
                out.push_str(&format!("echo 'export {}={}' >> {}\n", var, proxy_url, rc));
            }
        }
        out.push('\n');
    }

    // 7. fix home ownership
    out.push_str("chown -R root:root /root 2>/dev/null || true\n\n");

    // 8. host keys
    out.push_str("ssh-keygen -A >/dev/null 2>&1 || true\n\n");

    // 9. container_ready forensic event — appended directly to this
    // session's canonical event file (§3, §6), matching the shape the
    // orchestrator itself writes: timestamp, session_id, layer, event, data.
    out.push_str(&format!("mkdir -p {}/sessions\n", spec.forensics_dir));
    out.push_str(&format!(
        "echo \"{{\\\"timestamp\\\":\\\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\\\",\\\"session_id\\\":\\\"{}\\\",\\\"layer\\\":1,\\\"event\\\":\\\"container_ready\\\",\\\"data\\\":{{}}}}\" >> {}/sessions/{}.jsonl\n\n",
        spec.session_id, spec.forensics_dir, spec.session_id
    ));

    // 10. exec sshd in foreground
    out.push_str("exec /usr/sbin/sshd -D\n");

    out
}

/// Base64-encode the rendered entrypoint for injection as a container env
/// var (§4.2 step ii).
pub fn encode(spec: &EntrypointSpec) -> String {
    let script = render(spec);
    base64::engine::general_purpose::STANDARD.encode(script.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contradiction;
    use crate::config::Density;

    #[test]
    fn each_fragment_is_subshelled_and_swallowed() {
        let selection = contradiction::select(Density::Low, 1, 1);
        let refs: Vec<&Contradiction> = selection.clone();
        let spec = EntrypointSpec {
            session_id: "LBX-20260101-001",
            contradictions: &refs,
            l3_active: false,
            l4_active: false,
            proxy_ip: "172.28.0.254".into(),
            proxy_port: 8443,
            forensics_dir: "/forensics",
        };
        let script = render(&spec);
        for c in &selection {
            for frag in c.fragments {
                assert!(script.contains(&format!("( {} ) || true", frag)));
            }
        }
    }

    #[test]
    fn l3_active_exports_marker_and_sources_rc() {
        let spec = EntrypointSpec {
            session_id: "LBX-20260101-001",
            contradictions: &[],
            l3_active: true,
            l4_active: false,
            proxy_ip: "172.28.0.254".into(),
            proxy_port: 8443,
            forensics_dir: "/forensics",
        };
        let script = render(&spec);
        assert!(script.contains("LABYRINTH_L3_ACTIVE=1"));
        assert!(script.contains("source /usr/local/lib/blindfold.sh"));
    }

    #[test]
    fn l4_active_exports_proxy_vars_both_cases() {
        let spec = EntrypointSpec {
            session_id: "LBX-20260101-001",
            contradictions: &[],
            l3_active: false,
            l4_active: true,
            proxy_ip: "172.28.0.254".into(),
            proxy_port: 8443,
            forensics_dir: "/forensics",
        };
        let script = render(&spec);
        assert!(script.contains("export http_proxy=http://172.28.0.254:8443"));
        assert!(script.contains("export HTTPS_PROXY=http://172.28.0.254:8443"));
    }

    #[test]
    fn container_ready_is_appended_to_the_session_file_with_canonical_shape() {
        let spec = EntrypointSpec {
            session_id: "LBX-20260101-001",
            contradictions: &[],
            l3_active: false,
            l4_active: false,
            proxy_ip: "172.28.0.254".into(),
            proxy_port: 8443,
            forensics_dir: "/forensics",
        };
        let script = render(&spec);
        assert!(script.contains(">> /forensics/sessions/LBX-20260101-001.jsonl"));
        assert!(script.contains("\\\"session_id\\\":\\\"LBX-20260101-001\\\""));
        assert!(script.contains("\\\"layer\\\":1"));
        assert!(script.contains("\\\"event\\\":\\\"container_ready\\\""));
    }

    #[test]
    fn ends_with_exec_sshd() {
        let spec = EntrypointSpec {
            session_id: "LBX-20260101-001",
            contradictions: &[],
            l3_active: false,
            l4_active: false,
            proxy_ip: "172.28.0.254".into(),
            proxy_port: 8443,
            forensics_dir: "/forensics",
        };
        let script = render(&spec);
        assert!(script.trim_end().ends_with("exec /usr/sbin/sshd -D"));
    }

    #[test]
    fn encode_is_valid_base64() {
        let spec = EntrypointSpec {
            session_id: "LBX-20260101-001",
            contradictions: &[],
            l3_active: false,
            l4_active: false,
            proxy_ip: "172.28.0.254".into(),
            proxy_port: 8443,
            forensics_dir: "/forensics",
        };
        let encoded = encode(&spec);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert!(String::from_utf8(decoded).unwrap().contains("set -e"));
    }
}
