//! Bounded-lifetime state for in-flight message and file handshakes.
//!
//! The reference implementation never expires `archivos_pendientes` or
//! `mensaje_headers` (spec §9); this crate mandates bounded expiry here as a
//! deliberate improvement, recorded in DESIGN.md.
//!
//! Pending headers are keyed by the bare 1-byte `MessageId`, not by
//! `(sender, MessageId)`, matching the data model in spec §3. This is only
//! safe because a sender serializes its own flows (§9); a second sender
//! reusing the same id while a first sender's header is still pending is a
//! known, accepted brittleness of the wire format, not a bug in this
//! registry.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::types::{FileId, GroupName, MessageId, PeerId};

/// What a pending message header remembers until its body arrives.
#[derive(Debug, Clone)]
pub struct PendingHeader {
    pub sender: PeerId,
    pub is_broadcast: bool,
    pub group: Option<GroupName>,
    inserted_at: Instant,
}

/// Records accepted message headers awaiting their body datagram.
pub struct PendingHeaders {
    entries: Mutex<HashMap<MessageId, PendingHeader>>,
}

impl PendingHeaders {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, msg_id: MessageId, sender: PeerId, is_broadcast: bool, group: Option<GroupName>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            msg_id,
            PendingHeader {
                sender,
                is_broadcast,
                group,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Removes and returns the pending header for `msg_id`, if any — a body
    /// datagram consumes its header on first match.
    pub async fn take(&self, msg_id: MessageId) -> Option<PendingHeader> {
        self.entries.lock().await.remove(&msg_id)
    }

    /// Drops entries older than `expiry`, returning how many were removed.
    pub async fn expire(&self, expiry: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, header| now.duration_since(header.inserted_at) < expiry);
        before - entries.len()
    }
}

impl Default for PendingHeaders {
    fn default() -> Self {
        Self::new()
    }
}

/// What a pending file announcement remembers until the matching TCP
/// connection arrives (or the record expires).
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub sender: PeerId,
    pub expected_size: u64,
    pub sender_ip: IpAddr,
    inserted_at: Instant,
}

/// Records file announcements awaiting their TCP transfer, keyed by
/// `FileId` alone (spec §3: "FileId → (sender_peer_id, expected_size,
/// sender_ip, announce_time)").
pub struct PendingFiles {
    entries: Mutex<HashMap<FileId, PendingFile>>,
}

impl PendingFiles {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, file_id: FileId, sender: PeerId, expected_size: u64, sender_ip: IpAddr) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            file_id,
            PendingFile {
                sender,
                expected_size,
                sender_ip,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn take(&self, file_id: FileId) -> Option<PendingFile> {
        self.entries.lock().await.remove(&file_id)
    }

    pub async fn expire(&self, expiry: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, file| now.duration_since(file.inserted_at) < expiry);
        before - entries.len()
    }
}

impl Default for PendingFiles {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 20])
    }

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))
    }

    #[tokio::test]
    async fn pending_header_insert_then_take() {
        let headers = PendingHeaders::new();
        let sender = peer(1);
        headers.insert(7, sender, false, None).await;
        let taken = headers.take(7).await.unwrap();
        assert_eq!(taken.sender, sender);
        assert!(!taken.is_broadcast);
        // consumed on first take
        assert!(headers.take(7).await.is_none());
    }

    #[tokio::test]
    async fn pending_header_expires() {
        let headers = PendingHeaders::new();
        headers.insert(1, peer(1), false, None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = headers.expire(Duration::from_millis(5)).await;
        assert_eq!(removed, 1);
        assert!(headers.take(1).await.is_none());
    }

    #[tokio::test]
    async fn pending_file_insert_then_take() {
        let files = PendingFiles::new();
        let sender = peer(1);
        let file_id = FileId::generate();
        files.insert(file_id, sender, 1024, ip()).await;
        let taken = files.take(file_id).await.unwrap();
        assert_eq!(taken.expected_size, 1024);
        assert_eq!(taken.sender, sender);
        assert!(files.take(file_id).await.is_none());
    }

    #[tokio::test]
    async fn pending_file_expires() {
        let files = PendingFiles::new();
        let file_id = FileId::generate();
        files.insert(file_id, peer(1), 1024, ip()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = files.expire(Duration::from_millis(5)).await;
        assert_eq!(removed, 1);
    }
}
