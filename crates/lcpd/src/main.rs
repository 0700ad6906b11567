//! lcpd — headless LCP node.
//!
//! # Usage
//!
//! ```bash
//! lcpd                          # Start on the default port (9990)
//! lcpd --port 9876              # Use a specific port
//! lcpd --no-discovery           # Suppress the periodic self-announce echo
//! lcpd --recv-dir ./incoming    # Change where received files land
//! ```
//!
//! This binary has no console or menu (see the crate's non-goals): it opens
//! the shared UDP/TCP port, spawns the engine's background tasks, and logs
//! every event a console would otherwise render. It exists so the engine can
//! be exercised end to end without building the interactive front-end.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lcp_core::config::NodeConfig;
use lcp_core::{Engine, EngineEvent};
use tracing::{error, info, warn};

/// Headless LCP node — LAN chat and file transfer over a shared UDP/TCP port.
#[derive(Parser, Debug)]
#[command(name = "lcpd", about = "Headless LCP node")]
struct Cli {
    /// UDP/TCP port both sockets bind.
    #[arg(short, long, default_value_t = 9990)]
    port: u16,

    /// Destination address for broadcast datagrams.
    #[arg(long, default_value = "255.255.255.255")]
    broadcast_addr: IpAddr,

    /// Directory received files are written under.
    #[arg(long, default_value = "recibidos")]
    recv_dir: PathBuf,

    /// Suppress the periodic self-announce echo (useful in tests that want
    /// deterministic discovery via direct echoes only).
    #[arg(long)]
    no_discovery: bool,
}

impl Cli {
    fn into_config(self) -> NodeConfig {
        let mut config = NodeConfig::with_port(self.port);
        config.broadcast_addr = self.broadcast_addr;
        config.recv_dir = self.recv_dir;
        config.discovery_enabled = !self.no_discovery;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = cli.into_config();
    std::fs::create_dir_all(&config.recv_dir).context("could not create receive directory")?;

    let (engine, mut incoming_rx) = Engine::start(config)
        .await
        .context("failed to start LCP engine")?;

    info!(peer_id = %engine.peer_id(), "lcpd is running. Press Ctrl+C to stop.");

    let mut events_rx = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => log_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event log lagged behind the engine");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        while let Some(message) = incoming_rx.recv().await {
            info!(
                from = %message.from,
                broadcast = message.broadcast,
                group = ?message.group,
                text = %message.text,
                "message delivered"
            );
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(error) => error!(%error, "failed to listen for Ctrl+C"),
    }

    engine.shutdown();
    info!("lcpd stopped");
    Ok(())
}

/// Logs one engine event the way an interactive console would render it.
fn log_event(event: EngineEvent) {
    match event {
        EngineEvent::PeerDiscovered { peer, addr } => {
            info!(%peer, %addr, "peer discovered");
        }
        EngineEvent::PeerEvicted { peer } => {
            info!(%peer, "peer evicted for inactivity");
        }
        EngineEvent::GroupCreated { name, local } => {
            info!(group = %name, local, "group created");
        }
        EngineEvent::GroupJoined { name, peer, local } => {
            info!(group = %name, %peer, local, "group joined");
        }
        EngineEvent::MessageDelivered(_) => {
            // Already logged by the incoming-message task above.
        }
        EngineEvent::FileReceived { from, path, size } => {
            info!(%from, path = %path.display(), size, "file received");
        }
        EngineEvent::FileFailed { from, reason } => {
            warn!(%from, reason, "file transfer failed");
        }
    }
}

/// Initializes the tracing subscriber. The log level is controlled by the
/// `LCP_LOG` environment variable, defaulting to `info`.
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("LCP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
