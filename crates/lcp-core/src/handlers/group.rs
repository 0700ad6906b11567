//! Group membership receive path (spec §4.E, ops 3 and 4): replicates
//! create/join broadcasts into the local group registry.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::codec;
use crate::demux::Datagram;
use crate::engine::{EngineEvent, Shared};
use crate::group_registry::Membership;

pub async fn run_create_handler(
    shared: Arc<Shared>,
    mut group_create_rx: mpsc::Receiver<Datagram>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            datagram = group_create_rx.recv() => {
                match datagram {
                    Some(datagram) => handle_create(&shared, datagram).await,
                    None => break,
                }
            }
        }
    }
}

pub async fn run_join_handler(
    shared: Arc<Shared>,
    mut group_join_rx: mpsc::Receiver<Datagram>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            datagram = group_join_rx.recv() => {
                match datagram {
                    Some(datagram) => handle_join(&shared, datagram).await,
                    None => break,
                }
            }
        }
    }
}

async fn handle_create(shared: &Shared, datagram: Datagram) {
    let header = match codec::decode_header(&datagram.bytes) {
        Ok(header) => header,
        Err(error) => {
            tracing::debug!(%error, "dropping malformed group-create frame");
            return;
        }
    };
    if header.from == shared.me {
        // Our own create_group already registered and emitted locally.
        return;
    }

    shared.observe(header.from, datagram.addr.ip()).await;

    let name = match codec::group_name_at_41(&datagram.bytes) {
        Ok(name) => name,
        Err(error) => {
            tracing::debug!(%error, "dropping group-create frame with invalid group name");
            return;
        }
    };

    if shared.groups.create(name.clone(), header.from).await == Membership::New {
        tracing::info!(group = %name, creator = %header.from, "remote group created");
        shared.emit(EngineEvent::GroupCreated { name, local: false });
    }
}

async fn handle_join(shared: &Shared, datagram: Datagram) {
    let header = match codec::decode_header(&datagram.bytes) {
        Ok(header) => header,
        Err(error) => {
            tracing::debug!(%error, "dropping malformed group-join frame");
            return;
        }
    };
    if header.from == shared.me {
        return;
    }

    shared.observe(header.from, datagram.addr.ip()).await;

    let name = match codec::group_name_at_41(&datagram.bytes) {
        Ok(name) => name,
        Err(error) => {
            tracing::debug!(%error, "dropping group-join frame with invalid group name");
            return;
        }
    };

    match shared.groups.join(&name, header.from).await {
        Some(Membership::New) => {
            tracing::info!(group = %name, peer = %header.from, "remote peer joined group");
            shared.emit(EngineEvent::GroupJoined {
                name,
                peer: header.from,
                local: false,
            });
        }
        Some(Membership::AlreadyKnown) => {}
        None => {
            tracing::debug!(group = %name, peer = %header.from, "join rejected: group not known locally");
        }
    }
}
