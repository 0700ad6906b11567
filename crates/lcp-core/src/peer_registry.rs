//! Tracks peers observed on the LAN and reaps inactive ones.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::types::PeerId;

/// A peer's last-known address and liveness timestamp.
#[derive(Debug, Clone, Copy)]
pub struct PeerInfo {
    pub addr: IpAddr,
    pub last_seen: Instant,
}

/// Tracks peers seen via echo or any other received frame.
///
/// Guarded by a single `tokio::sync::Mutex`, matching the "each guarded by
/// its own lock, no lock nests another" rule from the concurrency model.
pub struct PeerRegistry {
    me: PeerId,
    peers: Mutex<HashMap<PeerId, PeerInfo>>,
}

impl PeerRegistry {
    pub fn new(me: PeerId) -> Self {
        Self {
            me,
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Records or refreshes a peer's address and liveness. Silently ignores
    /// `peer_id == me` so a node never learns about itself from its own
    /// broadcasts — invariant 1 of the testable properties.
    /// Records or refreshes a peer, returning `true` iff this `PeerId` had
    /// never been seen before — the caller uses this to raise a discovery
    /// notice only once per peer.
    pub async fn observe(&self, peer_id: PeerId, addr: IpAddr) -> bool {
        if peer_id == self.me || peer_id == PeerId::BROADCAST {
            return false;
        }
        let mut peers = self.peers.lock().await;
        let is_new = !peers.contains_key(&peer_id);
        peers.insert(
            peer_id,
            PeerInfo {
                addr,
                last_seen: Instant::now(),
            },
        );
        is_new
    }

    pub async fn lookup(&self, peer_id: PeerId) -> Option<PeerInfo> {
        self.peers.lock().await.get(&peer_id).copied()
    }

    pub async fn list(&self) -> Vec<(PeerId, PeerInfo)> {
        self.peers.lock().await.iter().map(|(id, info)| (*id, *info)).collect()
    }

    /// Removes every peer last seen more than `threshold` ago, returning the
    /// evicted ids.
    pub async fn evict_inactive(&self, threshold: Duration) -> Vec<PeerId> {
        let now = Instant::now();
        let mut peers = self.peers.lock().await;
        let stale: Vec<PeerId> = peers
            .iter()
            .filter(|(_, info)| now.duration_since(info.last_seen) >= threshold)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            peers.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))
    }

    #[tokio::test]
    async fn observe_then_lookup() {
        let me = PeerId::from_bytes([0; 20]);
        let registry = PeerRegistry::new(me);
        let other = PeerId::from_bytes([1; 20]);
        registry.observe(other, addr()).await;
        assert!(registry.lookup(other).await.is_some());
    }

    #[tokio::test]
    async fn observe_reports_new_peer_once() {
        let me = PeerId::from_bytes([0; 20]);
        let registry = PeerRegistry::new(me);
        let other = PeerId::from_bytes([1; 20]);
        assert!(registry.observe(other, addr()).await);
        assert!(!registry.observe(other, addr()).await);
    }

    #[tokio::test]
    async fn never_observes_self() {
        let me = PeerId::from_bytes([0; 20]);
        let registry = PeerRegistry::new(me);
        registry.observe(me, addr()).await;
        assert!(registry.lookup(me).await.is_none());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn never_observes_broadcast_sentinel() {
        let me = PeerId::from_bytes([0; 20]);
        let registry = PeerRegistry::new(me);
        registry.observe(PeerId::BROADCAST, addr()).await;
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn evict_inactive_removes_stale_peers_only() {
        let me = PeerId::from_bytes([0; 20]);
        let registry = PeerRegistry::new(me);
        let fresh = PeerId::from_bytes([1; 20]);
        let stale = PeerId::from_bytes([2; 20]);

        registry.observe(stale, addr()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.observe(fresh, addr()).await;

        let evicted = registry.evict_inactive(Duration::from_millis(10)).await;
        assert_eq!(evicted, vec![stale]);
        assert!(registry.lookup(fresh).await.is_some());
        assert!(registry.lookup(stale).await.is_none());
    }
}
