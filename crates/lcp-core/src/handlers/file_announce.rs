//! UDP side of file transfer (spec §4.E, op 2): records a pending-file
//! entry for the TCP server to consume. No UDP ack is sent for an announce
//! — the sender proceeds straight to the TCP phase (spec §9).

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::codec;
use crate::demux::Datagram;
use crate::engine::Shared;
use crate::types::PeerId;

pub async fn run(shared: Arc<Shared>, mut file_rx: mpsc::Receiver<Datagram>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            datagram = file_rx.recv() => {
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
            tracing::debug!(%error, "dropping malformed file-announce frame");
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

    let (file_id, expected_size) = codec::decode_file_announce(&header);
    shared
        .pending_files
        .insert(file_id, header.from, expected_size, datagram.addr.ip())
        .await;
    tracing::info!(file_id = %file_id, from = %header.from, expected_size, "file transfer announced");
}
