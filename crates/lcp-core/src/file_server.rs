//! TCP side of file transfer (spec §4.F): accepts one connection per
//! transfer, correlates it to a pending-file announce, and streams the
//! file to disk in fixed-size chunks.
//!
//! Grounded on the reference daemon's `MessageServer` accept loop
//! (`server.rs`): bind once, spawn one task per accepted connection, let
//! each connection own its own error handling so a single bad peer cannot
//! take down the listener.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;

use crate::engine::{EngineEvent, Shared};
use crate::types::{FileId, ResponseStatus};

/// Grace period between sending a file announce and dialing TCP, giving
/// the receiver's announce handler time to register the pending transfer.
pub const ANNOUNCE_GRACE: Duration = Duration::from_millis(100);

struct ActiveTransfer {
    abort: AbortHandle,
    path: Option<PathBuf>,
}

/// Tracks every file-transfer connection task currently in flight, so
/// shutdown can abort them and remove their partial files (spec §4.F,
/// §5: "in-flight transfers are aborted and partial files removed on
/// shutdown"). A connection registers itself when accepted and records its
/// destination path once one is known; aborted tasks never get to run their
/// own error-path cleanup, so this registry performs it on their behalf.
pub struct TransferRegistry {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, ActiveTransfer>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn register(&self, id: u64, abort: AbortHandle) {
        self.active.lock().await.insert(id, ActiveTransfer { abort, path: None });
    }

    async fn set_path(&self, id: u64, path: PathBuf) {
        if let Some(entry) = self.active.lock().await.get_mut(&id) {
            entry.path = Some(path);
        }
    }

    async fn remove(&self, id: u64) {
        self.active.lock().await.remove(&id);
    }

    /// Aborts every tracked connection task and deletes any partial file it
    /// had started writing.
    pub async fn abort_all(&self) {
        let mut active = self.active.lock().await;
        for (_, transfer) in active.drain() {
            transfer.abort.abort();
            if let Some(path) = transfer.path {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the TCP accept loop until `shutdown` signals true, then aborts
/// every in-flight transfer and removes its partial file (spec §5).
pub async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let listener = match TcpListener::bind((shared.config.bind_addr, shared.config.port)).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, "failed to bind TCP file listener");
            return;
        }
    };

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let shared = Arc::clone(&shared);
                        let id = shared.active_transfers.next_id();
                        let task_shared = Arc::clone(&shared);
                        let join_handle = tokio::spawn(async move {
                            if let Err(error) = handle_connection(task_shared, stream, id).await {
                                tracing::debug!(%error, %addr, "file transfer connection failed");
                            }
                        });
                        shared.active_transfers.register(id, join_handle.abort_handle()).await;
                    }
                    Err(error) => {
                        tracing::debug!(%error, "tcp accept failed");
                    }
                }
            }
        }
    }

    shared.active_transfers.abort_all().await;
}

async fn handle_connection(shared: Arc<Shared>, mut stream: tokio::net::TcpStream, id: u64) -> std::io::Result<()> {
    let timeout = shared.config.pending_expiry;
    let outcome = tokio::time::timeout(timeout, handle_connection_inner(&shared, &mut stream, id)).await;
    shared.active_transfers.remove(id).await;
    match outcome {
        Ok(inner) => inner,
        Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "file transfer timed out")),
    }
}

async fn handle_connection_inner(shared: &Shared, stream: &mut tokio::net::TcpStream, id: u64) -> std::io::Result<()> {
    let mut file_id_bytes = [0u8; 8];
    stream.read_exact(&mut file_id_bytes).await?;
    let file_id = FileId::from_bytes(file_id_bytes);

    let Some(pending) = shared.pending_files.take(file_id).await else {
        tracing::debug!(file_id = %file_id, "no pending announce for incoming file transfer, closing without ack");
        return Ok(());
    };

    tokio::fs::create_dir_all(&shared.config.recv_dir).await?;
    let path = destination_path(&shared.config.recv_dir, file_id);
    shared.active_transfers.set_path(id, path.clone()).await;

    match receive_to_file(stream, &path, pending.expected_size, shared.config.chunk_size).await {
        Ok(()) => {
            tracing::info!(file_id = %file_id, from = %pending.sender, path = %path.display(), "file received");
            shared.emit(EngineEvent::FileReceived {
                from: pending.sender,
                path,
                size: pending.expected_size,
            });
            stream.write_all(&[ResponseStatus::Ok.as_u8()]).await?;
        }
        Err(error) => {
            let _ = tokio::fs::remove_file(&path).await;
            tracing::warn!(file_id = %file_id, from = %pending.sender, %error, "file transfer failed");
            shared.emit(EngineEvent::FileFailed {
                from: pending.sender,
                reason: error.to_string(),
            });
            stream.write_all(&[ResponseStatus::InternalError.as_u8()]).await?;
        }
    }
    Ok(())
}

fn destination_path(recv_dir: &std::path::Path, file_id: FileId) -> PathBuf {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    recv_dir.join(format!("{file_id}_{millis}.bin"))
}

async fn receive_to_file(
    stream: &mut tokio::net::TcpStream,
    path: &std::path::Path,
    expected_size: u64,
    chunk_size: usize,
) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut remaining = expected_size;
    let mut buf = vec![0u8; chunk_size];
    while remaining > 0 {
        let want = remaining.min(chunk_size as u64) as usize;
        stream.read_exact(&mut buf[..want]).await?;
        file.write_all(&buf[..want]).await?;
        remaining -= want as u64;
    }
    Ok(())
}
