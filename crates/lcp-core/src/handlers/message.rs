//! Text-message receive path: header handlers (ops 1 and 5) plus the
//! shared body handler that completes whichever flow a body's `msg_id`
//! correlates to (spec §4.E).

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::codec;
use crate::demux::Datagram;
use crate::engine::{EngineEvent, IncomingMessage, Shared};
use crate::types::PeerId;

/// Drains op-1 (plain message) headers: records a pending header and acks
/// unicast senders immediately.
pub async fn run_header_handler(
    shared: Arc<Shared>,
    mut message_rx: mpsc::Receiver<Datagram>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            datagram = message_rx.recv() => {
                match datagram {
                    Some(datagram) => handle_header(&shared, datagram, None).await,
                    None => break,
                }
            }
        }
    }
}

/// Drains op-5 (group message) headers: accepts only if the group is known
/// locally and this node is a member, per spec §4.E.
pub async fn run_group_header_handler(
    shared: Arc<Shared>,
    mut group_message_rx: mpsc::Receiver<Datagram>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            datagram = group_message_rx.recv() => {
                match datagram {
                    Some(datagram) => handle_group_header(&shared, datagram).await,
                    None => break,
                }
            }
        }
    }
}

async fn handle_header(shared: &Shared, datagram: Datagram, group: Option<crate::types::GroupName>) {
    let header = match codec::decode_header(&datagram.bytes) {
        Ok(header) => header,
        Err(error) => {
            tracing::debug!(%error, "dropping malformed message header");
            return;
        }
    };
    if header.from == shared.me {
        return;
    }
    if header.to != shared.me && header.to != PeerId::BROADCAST {
        return;
    }

    shared.observe(header.from, datagram.addr.ip()).await;

    let is_broadcast = header.to == PeerId::BROADCAST && group.is_none();
    shared
        .pending_headers
        .insert(header.sub_id, header.from, is_broadcast, group)
        .await;

    if !is_broadcast {
        let response = codec::encode_response(crate::types::ResponseStatus::Ok, shared.me);
        if let Err(error) = shared.socket.send_to(&response, datagram.addr).await {
            tracing::debug!(%error, "failed to ack message header");
        }
    }
}

async fn handle_group_header(shared: &Shared, datagram: Datagram) {
    let header = match codec::decode_header(&datagram.bytes) {
        Ok(header) => header,
        Err(error) => {
            tracing::debug!(%error, "dropping malformed group-message header");
            return;
        }
    };
    if header.from == shared.me {
        return;
    }

    shared.observe(header.from, datagram.addr.ip()).await;

    let name = match codec::group_name_from_trailer(&header) {
        Ok(name) => name,
        Err(error) => {
            tracing::debug!(%error, "dropping group-message header with invalid group name");
            return;
        }
    };

    if !shared.groups.is_known(&name).await || !shared.groups.is_member(&name, shared.me).await {
        tracing::debug!(group = %name, "dropping group-message header for a group we are not a member of");
        return;
    }

    handle_header(
        shared,
        Datagram {
            addr: datagram.addr,
            bytes: datagram.bytes,
        },
        Some(name),
    )
    .await;
}

/// Drains the body queue shared by plain and group messages: correlates
/// each body to its pending header by `msg_id`, delivers it to the
/// incoming-message stream, and (for unicast) sends the final ack.
pub async fn run_body_handler(shared: Arc<Shared>, mut body_rx: mpsc::Receiver<Datagram>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            datagram = body_rx.recv() => {
                match datagram {
                    Some(datagram) => handle_body(&shared, datagram).await,
                    None => break,
                }
            }
        }
    }
}

async fn handle_body(shared: &Shared, datagram: Datagram) {
    let (msg_id, text) = match codec::decode_body(&datagram.bytes) {
        Ok(decoded) => decoded,
        Err(error) => {
            tracing::debug!(%error, "dropping malformed message body");
            return;
        }
    };

    let Some(pending) = shared.pending_headers.take(msg_id).await else {
        tracing::debug!(msg_id, "dropping body with no matching pending header");
        return;
    };

    let incoming = IncomingMessage {
        from: pending.sender,
        text,
        broadcast: pending.is_broadcast,
        group: pending.group.clone(),
    };
    let _ = shared.incoming.send(incoming.clone()).await;
    shared.emit(EngineEvent::MessageDelivered(incoming));

    if !pending.is_broadcast {
        let response = codec::encode_response(crate::types::ResponseStatus::Ok, shared.me);
        if let Err(error) = shared.socket.send_to(&response, datagram.addr).await {
            tracing::debug!(%error, "failed to ack message body");
        }
    }
}
