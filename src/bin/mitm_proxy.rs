//! `labyrinth-mitm` — the TLS-terminating interception proxy binary (§4.8).
//!
//! Loads the shared configuration (proxy bind address, forensics directory)
//! and runs [`labyrinth::mitm::proxy::MitmProxy`] until terminated. The
//! orchestrator process and this process share the same forensics volume:
//! the orchestrator writes `proxy_session_map.json` and the L4 mode file,
//! this process only reads them.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use labyrinth::config::Config;
use labyrinth::forensics;
use labyrinth::mitm::ca::CertificateAuthority;
use labyrinth::mitm::pipeline::InterceptionPipeline;
use labyrinth::mitm::proxy::MitmProxy;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/labyrinth/labyrinth.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load config from {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.forensics_dir) {
        log::error!("failed to create forensics directory {}: {}", config.forensics_dir.display(), e);
        std::process::exit(1);
    }

    let ca = match CertificateAuthority::load_or_generate(&config.forensics_dir) {
        Ok(ca) => ca,
        Err(e) => {
            log::error!("failed to load or generate interception CA: {}", e);
            std::process::exit(1);
        }
    };

    // the MITM proxy does not record to the per-session forensic stream
    // through the same writer as the orchestrator; it runs its own
    // background writer against the same shared directory (§9: multiple
    // writers to disjoint files is safe, each event file has one writer).
    let (writer, writer_task) = forensics::create(config.forensics_dir.clone(), config.siem.clone());
    tokio::spawn(writer_task);

    let pipeline = InterceptionPipeline::new(config.forensics_dir.clone(), writer);

    let listen_addr: SocketAddr = match format!("0.0.0.0:{}", config.l4.proxy_port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            log::error!("invalid proxy listen address: {}", e);
            std::process::exit(1);
        }
    };

    let proxy = MitmProxy::new(listen_addr, ca, pipeline);

    log::info!("labyrinth-mitm started on {}", listen_addr);

    if let Err(e) = proxy.run().await {
        log::error!("mitm proxy exited: {}", e);
        std::process::exit(1);
    }
}
