//! Discovery via periodic UDP broadcast echo (spec §4.E, op 0).
//!
//! The reference daemon discovers peers via mDNS (`familycomd::discovery`);
//! this node instead borrows the broadcast-heartbeat shape of
//! `wichain-network`'s `NetworkNode` (`periodic_broadcast` / `recv_loop`),
//! since the wire protocol here has no mDNS analogue.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::codec;
use crate::demux::Datagram;
use crate::engine::Shared;
use crate::types::{Op, PeerId, ResponseStatus};

/// Drains the echo queue: updates the peer registry and, for frames
/// addressed to BROADCAST, unicasts an `OK` back to the sender.
pub async fn run(shared: Arc<Shared>, mut echo_rx: mpsc::Receiver<Datagram>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            datagram = echo_rx.recv() => {
                match datagram {
                    Some(datagram) => handle_one(&shared, datagram).await,
                    None => break,
                }
            }
        }
    }
}

async fn handle_one(shared: &Shared, datagram: Datagram) {
    let header = match codec::decode_header(&datagram.bytes) {
        Ok(header) => header,
        Err(error) => {
            tracing::debug!(%error, "dropping malformed echo frame");
            return;
        }
    };
    if header.from == shared.me {
        return;
    }

    shared.observe(header.from, datagram.addr.ip()).await;

    if header.to == PeerId::BROADCAST {
        let response = codec::encode_response(ResponseStatus::Ok, shared.me);
        if let Err(error) = shared.socket.send_to(&response, datagram.addr).await {
            tracing::debug!(%error, "failed to send echo ack");
        }
    }
}

/// Periodically announces this node's presence with an echo addressed to
/// BROADCAST. `tokio::time::interval`'s first tick fires immediately, so
/// the first announce goes out as soon as the engine starts.
pub async fn run_periodic_announce(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.echo_interval);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                send_echo(&shared).await;
            }
        }
    }
}

async fn send_echo(shared: &Shared) {
    let header = codec::encode_header(shared.me, PeerId::BROADCAST, Op::Echo, 0, 0, &[0u8; 50]);
    if let Err(error) = shared.socket.send_to(&header, shared.broadcast_dest()).await {
        tracing::debug!(%error, "failed to send periodic echo");
    }
}
