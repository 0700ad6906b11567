//! UDP demultiplexer: the single reader of the shared socket's receive side.
//!
//! Classifies each datagram by length and, for header-shaped frames, by the
//! `op` byte at offset 40 — then hands it off to a per-operation queue. The
//! demultiplexer does no protocol work itself (spec §4.D); every queue has
//! dedicated handler(s) downstream.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use crate::codec::RESPONSE_LEN;
use crate::types::Op;

/// A UDP datagram paired with the address it arrived from.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Maximum UDP datagram size this node will read in one `recv_from` call.
pub const MAX_DATAGRAM_LEN: usize = 65507;

const QUEUE_CAPACITY: usize = 256;

/// Sending half of every per-operation queue; owned by [`run`].
pub struct DemuxSenders {
    response: mpsc::Sender<Datagram>,
    echo: mpsc::Sender<Datagram>,
    message: mpsc::Sender<Datagram>,
    file: mpsc::Sender<Datagram>,
    group_create: mpsc::Sender<Datagram>,
    group_join: mpsc::Sender<Datagram>,
    group_message: mpsc::Sender<Datagram>,
    body: mpsc::Sender<Datagram>,
}

/// Receiving half of every per-operation queue; each is drained by exactly
/// one handler task.
pub struct DemuxReceivers {
    pub response: mpsc::Receiver<Datagram>,
    pub echo: mpsc::Receiver<Datagram>,
    pub message: mpsc::Receiver<Datagram>,
    pub file: mpsc::Receiver<Datagram>,
    pub group_create: mpsc::Receiver<Datagram>,
    pub group_join: mpsc::Receiver<Datagram>,
    pub group_message: mpsc::Receiver<Datagram>,
    pub body: mpsc::Receiver<Datagram>,
}

/// Builds the sender/receiver halves of every per-operation queue.
pub fn channels() -> (DemuxSenders, DemuxReceivers) {
    let (response_tx, response_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (echo_tx, echo_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (message_tx, message_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (file_tx, file_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (group_create_tx, group_create_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (group_join_tx, group_join_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (group_message_tx, group_message_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (body_tx, body_rx) = mpsc::channel(QUEUE_CAPACITY);

    (
        DemuxSenders {
            response: response_tx,
            echo: echo_tx,
            message: message_tx,
            file: file_tx,
            group_create: group_create_tx,
            group_join: group_join_tx,
            group_message: group_message_tx,
            body: body_tx,
        },
        DemuxReceivers {
            response: response_rx,
            echo: echo_rx,
            message: message_rx,
            file: file_rx,
            group_create: group_create_rx,
            group_join: group_join_rx,
            group_message: group_message_rx,
            body: body_rx,
        },
    )
}

/// Classifies one datagram and routes it to the matching queue. Exposed
/// separately from [`run`] so tests can drive it without a real socket.
pub async fn classify_and_route(bytes: &[u8], addr: SocketAddr, senders: &DemuxSenders) {
    let datagram = || Datagram {
        addr,
        bytes: bytes.to_vec(),
    };

    if bytes.len() == RESPONSE_LEN {
        let _ = senders.response.send(datagram()).await;
        return;
    }

    if bytes.len() >= 41 {
        match Op::try_from(bytes[40]) {
            Ok(Op::Echo) => {
                let _ = senders.echo.send(datagram()).await;
            }
            Ok(Op::Message) => {
                let _ = senders.message.send(datagram()).await;
            }
            Ok(Op::File) => {
                let _ = senders.file.send(datagram()).await;
            }
            Ok(Op::GroupCreate) => {
                let _ = senders.group_create.send(datagram()).await;
            }
            Ok(Op::GroupJoin) => {
                let _ = senders.group_join.send(datagram()).await;
            }
            Ok(Op::GroupMessage) => {
                let _ = senders.group_message.send(datagram()).await;
            }
            Err(op) => {
                tracing::warn!(op, %addr, "dropping frame with unknown operation code");
            }
        }
        return;
    }

    if !bytes.is_empty() {
        let _ = senders.body.send(datagram()).await;
        return;
    }

    tracing::debug!(%addr, "dropping empty datagram");
}

/// Runs the demultiplexer's read loop until `shutdown` signals true.
pub async fn run(socket: Arc<UdpSocket>, senders: DemuxSenders, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, addr)) => classify_and_route(&buf[..len], addr, &senders).await,
                    Err(error) => {
                        tracing::debug!(%error, "udp recv_from failed");
                    }
                }
            }
        }
    }
}
