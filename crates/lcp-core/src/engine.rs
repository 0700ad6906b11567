//! The node engine: owns both sockets, every registry, and the Sender API.
//!
//! Mirrors the reference daemon's `DaemonApp` — a single struct holding all
//! shared state, with a `broadcast::Sender` fanning engine-level events out
//! to external collaborators — but built around two sockets and a UDP
//! demultiplexer instead of one TCP connection per peer.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch, Mutex};

use crate::codec::{self, CodecError};
use crate::config::NodeConfig;
use crate::demux::{self, Datagram};
use crate::group_registry::GroupRegistry;
use crate::peer_registry::PeerRegistry;
use crate::pending::{PendingFiles, PendingHeaders};
use crate::types::{FileId, GroupName, GroupNameError, MessageId, Op, PeerId, ResponseStatus};
use crate::{file_server, handlers};

/// Errors the Sender API and engine setup can surface to a caller.
///
/// No error escapes a worker task (spec §7): handlers log and drop their
/// own I/O failures, and this enum is reserved for failures a direct caller
/// of [`Engine`]'s methods needs to react to.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("timed out waiting for an acknowledgment")]
    Timeout,
    #[error("peer rejected the request with status {0:?}")]
    Rejected(ResponseStatus),
    #[error("peer {0} is not registered")]
    UnknownPeer(PeerId),
    #[error("group {0:?} is not known locally")]
    UnknownGroup(GroupName),
    #[error("message payload of {got} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { max: usize, got: usize },
    #[error("group name invalid: {0}")]
    GroupName(#[from] GroupNameError),
    #[error("wire codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("socket or file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A text message delivered to the application, tagged with its origin.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub from: PeerId,
    pub text: String,
    pub broadcast: bool,
    pub group: Option<GroupName>,
}

/// Events an external collaborator can subscribe to, mirroring every
/// user-visible notice called out in §4 of the design.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PeerDiscovered { peer: PeerId, addr: IpAddr },
    PeerEvicted { peer: PeerId },
    GroupCreated { name: GroupName, local: bool },
    GroupJoined { name: GroupName, peer: PeerId, local: bool },
    MessageDelivered(IncomingMessage),
    FileReceived { from: PeerId, path: PathBuf, size: u64 },
    FileFailed { from: PeerId, reason: String },
}

/// State shared by the engine's public API and every background task.
///
/// Each collection is guarded by its own lock and no lock nests another,
/// per the concurrency model in spec §5.
pub struct Shared {
    pub me: PeerId,
    pub config: NodeConfig,
    pub socket: Arc<UdpSocket>,
    pub peers: PeerRegistry,
    pub groups: GroupRegistry,
    pub pending_headers: PendingHeaders,
    pub pending_files: PendingFiles,
    pub active_transfers: file_server::TransferRegistry,
    pub events: broadcast::Sender<EngineEvent>,
    pub incoming: mpsc::Sender<IncomingMessage>,
    /// Single consumer of ack datagrams, enforced by holding this lock for
    /// the whole send-and-wait critical section (spec §5: "Response queue:
    /// single consumer at a time, enforced by the sender lock").
    response_rx: Mutex<mpsc::Receiver<Datagram>>,
    next_msg_id: AtomicU8,
}

impl Shared {
    pub(crate) fn broadcast_dest(&self) -> SocketAddr {
        SocketAddr::new(self.config.broadcast_addr, self.config.port)
    }

    pub(crate) fn next_msg_id(&self) -> MessageId {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Records a sender in the peer registry, emitting a discovery event
    /// the first time this `PeerId` is seen (spec §4.B: "observe is called
    /// by every ingress handler before any further processing").
    pub(crate) async fn observe(&self, peer: PeerId, addr: IpAddr) {
        if self.peers.observe(peer, addr).await {
            tracing::info!(%peer, %addr, "peer discovered");
            self.emit(EngineEvent::PeerDiscovered { peer, addr });
        }
    }

    /// Awaits a standard response from `expected` on an already-locked
    /// response queue, discarding stray acks from other peers — the
    /// validation the design notes call for to guard against the
    /// shared-socket brittleness in spec §9.
    ///
    /// Callers that send more than one datagram and wait for an ack after
    /// each (a two-phase send) must hold the same lock guard across every
    /// wait in the exchange — see [`Shared::lock_sender`] — since acks
    /// carry no `msg_id` and a from-peer match alone cannot tell two
    /// concurrent exchanges with the same peer apart.
    pub(crate) async fn await_ack_locked(
        &self,
        response_rx: &mut mpsc::Receiver<Datagram>,
        expected: PeerId,
        timeout: Duration,
    ) -> Result<ResponseStatus, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::Timeout);
            }
            let datagram = tokio::time::timeout(remaining, response_rx.recv())
                .await
                .map_err(|_| EngineError::Timeout)?
                .ok_or(EngineError::Timeout)?;
            let (status, from) = codec::decode_response(&datagram.bytes)?;
            if from == expected {
                return Ok(status);
            }
            tracing::debug!(%from, %expected, "discarding ack from unexpected peer");
        }
    }

    /// Locks the response queue for the duration of a two-phase
    /// send-and-wait exchange (spec §5: "Response queue: single consumer at
    /// a time, enforced by the sender lock").
    pub(crate) async fn lock_sender(&self) -> tokio::sync::MutexGuard<'_, mpsc::Receiver<Datagram>> {
        self.response_rx.lock().await
    }
}

/// A running LCP node: one UDP socket, one TCP listener, and every
/// background task wired together. Dropping the last clone of the returned
/// [`Engine`] does not stop the node — call [`Engine::shutdown`] for that.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    /// Binds both sockets and spawns every background task: the UDP
    /// demultiplexer, one handler per operation queue, the TCP file server,
    /// the peer reaper, the pending-state reaper, and (unless disabled) the
    /// periodic self-announce echo.
    ///
    /// Returns the engine handle plus the receiving end of the incoming
    /// message stream; event subscribers attach via [`Engine::subscribe`].
    pub async fn start(config: NodeConfig) -> Result<(Engine, mpsc::Receiver<IncomingMessage>), EngineError> {
        let me = PeerId::generate();
        let socket = Arc::new(bind_dual_use_socket(config.bind_addr, config.port).await?);
        let (demux_senders, demux_receivers) = demux::channels();
        let (events_tx, _) = broadcast::channel(256);
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            me,
            config: config.clone(),
            socket: Arc::clone(&socket),
            peers: PeerRegistry::new(me),
            groups: GroupRegistry::new(),
            pending_headers: PendingHeaders::new(),
            pending_files: PendingFiles::new(),
            active_transfers: file_server::TransferRegistry::new(),
            events: events_tx,
            incoming: incoming_tx,
            response_rx: Mutex::new(demux_receivers.response),
            next_msg_id: AtomicU8::new(0),
        });

        tokio::spawn(demux::run(Arc::clone(&socket), demux_senders, shutdown_rx.clone()));

        tokio::spawn(handlers::echo::run(
            Arc::clone(&shared),
            demux_receivers.echo,
            shutdown_rx.clone(),
        ));
        if shared.config.discovery_enabled {
            tokio::spawn(handlers::echo::run_periodic_announce(
                Arc::clone(&shared),
                shutdown_rx.clone(),
            ));
        }

        tokio::spawn(handlers::message::run_header_handler(
            Arc::clone(&shared),
            demux_receivers.message,
            shutdown_rx.clone(),
        ));
        tokio::spawn(handlers::message::run_group_header_handler(
            Arc::clone(&shared),
            demux_receivers.group_message,
            shutdown_rx.clone(),
        ));
        tokio::spawn(handlers::message::run_body_handler(
            Arc::clone(&shared),
            demux_receivers.body,
            shutdown_rx.clone(),
        ));

        tokio::spawn(handlers::file_announce::run(
            Arc::clone(&shared),
            demux_receivers.file,
            shutdown_rx.clone(),
        ));

        tokio::spawn(handlers::group::run_create_handler(
            Arc::clone(&shared),
            demux_receivers.group_create,
            shutdown_rx.clone(),
        ));
        tokio::spawn(handlers::group::run_join_handler(
            Arc::clone(&shared),
            demux_receivers.group_join,
            shutdown_rx.clone(),
        ));

        tokio::spawn(file_server::run(Arc::clone(&shared), shutdown_rx.clone()));

        tokio::spawn(run_peer_reaper(Arc::clone(&shared), shutdown_rx.clone()));
        tokio::spawn(run_pending_reaper(Arc::clone(&shared), shutdown_rx.clone()));

        Ok((Engine { shared, shutdown_tx }, incoming_rx))
    }

    pub fn peer_id(&self) -> PeerId {
        self.shared.me
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub async fn peers(&self) -> Vec<(PeerId, IpAddr)> {
        self.shared
            .peers
            .list()
            .await
            .into_iter()
            .map(|(id, info)| (id, info.addr))
            .collect()
    }

    pub async fn groups(&self) -> Vec<GroupName> {
        self.shared.groups.list().await
    }

    pub async fn group_members(&self, name: &GroupName) -> Vec<PeerId> {
        self.shared.groups.members(name).await
    }

    /// Signals every background task to stop at its next iteration
    /// boundary (spec §5: cancellation via a shared running flag).
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Sends a unicast text message and awaits the receiver's two acks
    /// (header-ack, body-ack), per the sender state machine in spec §4.E.
    pub async fn send_message(&self, peer: PeerId, text: &str) -> Result<(), EngineError> {
        validate_payload(text, self.shared.config.max_message_payload)?;
        let info = self
            .shared
            .peers
            .lookup(peer)
            .await
            .ok_or(EngineError::UnknownPeer(peer))?;
        let dest = SocketAddr::new(info.addr, self.shared.config.port);
        let msg_id = self.shared.next_msg_id();

        let header = codec::encode_header(self.shared.me, peer, Op::Message, msg_id, text.len() as u64, &[0u8; 50]);
        let body = codec::encode_body(msg_id, text)?;
        let timeout = self.shared.config.timeout;

        // Acks carry no msg_id (spec §6), so a concurrent send_message to
        // the same peer could otherwise consume this exchange's body-ack in
        // the window between the header-ack and the body send. Hold the
        // sender lock across both waits, not just each one individually.
        let mut response_rx = self.shared.lock_sender().await;
        self.shared.socket.send_to(&header, dest).await?;
        expect_ok(self.shared.await_ack_locked(&mut response_rx, peer, timeout).await?)?;

        self.shared.socket.send_to(&body, dest).await?;
        expect_ok(self.shared.await_ack_locked(&mut response_rx, peer, timeout).await?)?;

        Ok(())
    }

    /// Sends a broadcast text message. No ack is awaited (spec §4.E).
    pub async fn send_broadcast(&self, text: &str) -> Result<(), EngineError> {
        validate_payload(text, self.shared.config.max_message_payload)?;
        let dest = self.shared.broadcast_dest();
        let msg_id = self.shared.next_msg_id();

        let header = codec::encode_header(
            self.shared.me,
            PeerId::BROADCAST,
            Op::Message,
            msg_id,
            text.len() as u64,
            &[0u8; 50],
        );
        self.shared.socket.send_to(&header, dest).await?;

        let body = codec::encode_body(msg_id, text)?;
        self.shared.socket.send_to(&body, dest).await?;

        Ok(())
    }

    /// Broadcasts a `MENSAJE_GRUPAL` frame. No per-recipient ack is awaited
    /// by the sender (spec §4.E); individual members ack independently and
    /// those acks are discarded by [`Shared::await_ack_locked`]'s peer check
    /// on the next real wait.
    pub async fn send_group_message(&self, name: &GroupName, text: &str) -> Result<(), EngineError> {
        validate_payload(text, self.shared.config.max_message_payload)?;
        let dest = self.shared.broadcast_dest();
        let msg_id = self.shared.next_msg_id();

        let header = codec::encode_header_with_group_name_in_trailer(
            self.shared.me,
            PeerId::BROADCAST,
            msg_id,
            text.len() as u64,
            name,
        );
        self.shared.socket.send_to(&header, dest).await?;

        let body = codec::encode_body(msg_id, text)?;
        self.shared.socket.send_to(&body, dest).await?;

        Ok(())
    }

    /// Registers a group locally (idempotent) and announces it to the LAN.
    pub async fn create_group(&self, name: GroupName) -> Result<(), EngineError> {
        self.shared.groups.create(name.clone(), self.shared.me).await;
        let header =
            codec::encode_header_with_group_name_at_41(self.shared.me, PeerId::BROADCAST, Op::GroupCreate, &name);
        self.shared.socket.send_to(&header, self.shared.broadcast_dest()).await?;
        self.shared.emit(EngineEvent::GroupCreated { name, local: true });
        Ok(())
    }

    /// Joins a group already known locally and announces the join to the
    /// LAN. Joining a group this node has never observed a create for is
    /// rejected up front.
    pub async fn join_group(&self, name: GroupName) -> Result<(), EngineError> {
        if !self.shared.groups.is_known(&name).await {
            return Err(EngineError::UnknownGroup(name));
        }
        self.shared.groups.join(&name, self.shared.me).await;
        let header =
            codec::encode_header_with_group_name_at_41(self.shared.me, PeerId::BROADCAST, Op::GroupJoin, &name);
        self.shared.socket.send_to(&header, self.shared.broadcast_dest()).await?;
        self.shared.emit(EngineEvent::GroupJoined {
            name,
            peer: self.shared.me,
            local: true,
        });
        Ok(())
    }

    /// Sends a file: a UDP announce followed by a TCP stream of the raw
    /// bytes, per spec §4.G. No UDP ack is awaited before the TCP connect —
    /// the connect itself is the implicit go-ahead (spec §9).
    pub async fn send_file(&self, peer: PeerId, path: &Path) -> Result<(), EngineError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let info = self
            .shared
            .peers
            .lookup(peer)
            .await
            .ok_or(EngineError::UnknownPeer(peer))?;
        let metadata = tokio::fs::metadata(path).await?;
        let size = metadata.len();
        let file_id = FileId::generate();

        let announce = codec::encode_file_announce(self.shared.me, peer, file_id, size);
        let addr = SocketAddr::new(info.addr, self.shared.config.port);
        self.shared.socket.send_to(&announce, addr).await?;

        tokio::time::sleep(file_server::ANNOUNCE_GRACE).await;

        let mut stream = tokio::net::TcpStream::connect(addr).await?;
        stream.write_all(file_id.as_bytes()).await?;

        let mut file = tokio::fs::File::open(path).await?;
        let mut buf = vec![0u8; self.shared.config.chunk_size];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
        }

        let mut status_byte = [0u8; 1];
        stream.read_exact(&mut status_byte).await?;
        match ResponseStatus::try_from(status_byte[0]) {
            Ok(ResponseStatus::Ok) => Ok(()),
            Ok(other) => Err(EngineError::Rejected(other)),
            Err(_) => Err(EngineError::Rejected(ResponseStatus::InternalError)),
        }
    }
}

fn expect_ok(status: ResponseStatus) -> Result<(), EngineError> {
    if status == ResponseStatus::Ok {
        Ok(())
    } else {
        Err(EngineError::Rejected(status))
    }
}

fn validate_payload(text: &str, max: usize) -> Result<(), EngineError> {
    if text.len() > max {
        return Err(EngineError::PayloadTooLarge { max, got: text.len() });
    }
    Ok(())
}

async fn bind_dual_use_socket(bind_addr: IpAddr, port: u16) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((bind_addr, port)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Periodically evicts peers unheard from for `inactivity_threshold`,
/// emitting an event per eviction (spec §4.B).
async fn run_peer_reaper(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.inactivity_threshold);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                for peer in shared.peers.evict_inactive(shared.config.inactivity_threshold).await {
                    tracing::info!(peer = %peer, "peer evicted for inactivity");
                    shared.emit(EngineEvent::PeerEvicted { peer });
                }
            }
        }
    }
}

/// Periodically garbage-collects expired pending-header and pending-file
/// records (the bounded-expiry improvement over the reference; spec §9).
async fn run_pending_reaper(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.pending_expiry);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let headers = shared.pending_headers.expire(shared.config.pending_expiry).await;
                let files = shared.pending_files.expire(shared.config.pending_expiry).await;
                if headers > 0 || files > 0 {
                    tracing::debug!(headers, files, "expired stale pending records");
                }
            }
        }
    }
}
