//! Node configuration.
//!
//! Unlike the reference daemon's `AppConfig`, LCP has no on-disk config file:
//! there is no persisted display name or peer identity, and message history
//! is explicitly out of scope for this crate (see spec §1). `NodeConfig` is
//! plain, serde-free configuration data constructed from CLI flags or test
//! code and handed to [`crate::engine::Engine::start`].

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// The well-known UDP/TCP port LCP binds by default.
pub const DEFAULT_PORT: u16 = 9990;

/// Base round-trip timeout for a single ack wait.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// How long a peer may go unheard before being evicted: `3 × TIMEOUT`.
pub const INACTIVITY_THRESHOLD: Duration = Duration::from_secs(15);

/// How often this node announces itself via an unsolicited echo.
pub const ECHO_INTERVAL: Duration = Duration::from_secs(15);

/// How long a pending-file or pending-header record may sit unclaimed
/// before it is garbage-collected: `3 × TIMEOUT`.
pub const PENDING_EXPIRY: Duration = Duration::from_secs(15);

/// Chunk size used for both sides of a TCP file transfer.
pub const CHUNK_SIZE: usize = 4096;

/// Maximum UTF-8 payload size for a single message body.
pub const MAX_MESSAGE_PAYLOAD: usize = 1024;

/// Default directory received files are written under.
pub const DEFAULT_RECV_DIR: &str = "recibidos";

/// Tunable parameters for one running node.
///
/// Mirrors the constants the reference Python implementation hardcodes at
/// module scope (`PUERTO`, `BROADCAST_ADDR`, `TIMEOUT`,
/// `INTERVALO_AUTODESCUBRIMIENTO`), but as an explicit value so multiple
/// nodes can run side by side in tests with distinct ports and broadcast
/// addresses.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Interface address both sockets bind. Defaults to all interfaces;
    /// overriding it to a specific loopback alias (e.g. `127.0.0.2`) lets
    /// more than one node share the well-known port on a single test host.
    pub bind_addr: IpAddr,
    /// UDP/TCP port both sockets bind.
    pub port: u16,
    /// Destination address for broadcast datagrams.
    pub broadcast_addr: IpAddr,
    /// Directory received files are written under.
    pub recv_dir: PathBuf,
    /// Timeout for a single ack wait.
    pub timeout: Duration,
    /// Inactivity threshold before a peer is evicted.
    pub inactivity_threshold: Duration,
    /// Interval between unsolicited self-announce echoes.
    pub echo_interval: Duration,
    /// Expiry for pending-file and pending-header records.
    pub pending_expiry: Duration,
    /// Chunk size for TCP file transfer reads/writes.
    pub chunk_size: usize,
    /// Maximum accepted message body payload, in bytes.
    pub max_message_payload: usize,
    /// When false, the periodic self-announce echo task is not spawned.
    /// Useful in tests that want deterministic peer discovery via direct
    /// echoes only.
    pub discovery_enabled: bool,
}

impl NodeConfig {
    /// A config with every field at its spec-mandated default, bound to
    /// the given port (so tests can run several nodes on loopback without
    /// colliding on 9990).
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            broadcast_addr: IpAddr::V4(Ipv4Addr::new(255, 255, 255, 255)),
            recv_dir: PathBuf::from(DEFAULT_RECV_DIR),
            timeout: TIMEOUT,
            inactivity_threshold: INACTIVITY_THRESHOLD,
            echo_interval: ECHO_INTERVAL,
            pending_expiry: PENDING_EXPIRY,
            chunk_size: CHUNK_SIZE,
            max_message_payload: MAX_MESSAGE_PAYLOAD,
            discovery_enabled: true,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::with_port(DEFAULT_PORT)
    }
}
