//! End-to-end scenarios exercising two or more in-process engines at once.
//!
//! Each node binds a distinct loopback alias (`127.0.0.x`) on the *same*
//! port, so the peer-lookup-then-send path matches real deployment (one
//! well-known port shared by every node) instead of relying on per-node
//! ports, which the wire format has no way to carry. Loopback interfaces
//! do not forward datagrams addressed to the limited broadcast address
//! between aliases, so two stand-ins take the place of a real subnet
//! broadcast: `introduce` seeds peer discovery directly, and
//! `spawn_broadcast_relay` re-sends anything addressed to it out to a
//! fixed participant list, standing in for the LAN segment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use lcp_core::codec;
use lcp_core::config::NodeConfig;
use lcp_core::types::{GroupName, Op, PeerId};
use lcp_core::{Engine, EngineEvent, IncomingMessage};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

fn loopback(alias: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, alias)), port)
}

fn test_config(alias: u8, port: u16, recv_dir: &std::path::Path) -> NodeConfig {
    let mut config = NodeConfig::with_port(port);
    config.bind_addr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, alias));
    config.discovery_enabled = false;
    config.timeout = Duration::from_millis(800);
    config.inactivity_threshold = Duration::from_millis(300);
    config.echo_interval = Duration::from_millis(200);
    config.pending_expiry = Duration::from_secs(2);
    config.recv_dir = recv_dir.to_path_buf();
    config
}

/// Seeds mutual peer discovery the way a LAN broadcast echo would, without
/// depending on loopback broadcast forwarding: sends a direct echo frame
/// from a throwaway socket to each engine's address, carrying the other
/// engine's `PeerId`.
async fn introduce(a_peer: PeerId, a_addr: SocketAddr, b_peer: PeerId, b_addr: SocketAddr) {
    let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let echo_from_a = codec::encode_header(a_peer, PeerId::BROADCAST, Op::Echo, 0, 0, &[0u8; 50]);
    relay.send_to(&echo_from_a, b_addr).await.unwrap();
    let echo_from_b = codec::encode_header(b_peer, PeerId::BROADCAST, Op::Echo, 0, 0, &[0u8; 50]);
    relay.send_to(&echo_from_b, a_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
}

/// Binds a socket on `relay_addr` that re-sends every datagram it receives
/// to every address in `participants`, standing in for a LAN segment's
/// broadcast domain. Every test node should point `broadcast_addr` at this
/// socket's IP so a single `send_to(broadcast_dest)` call fans out to all
/// of them, the way a real subnet broadcast would.
async fn spawn_broadcast_relay(relay_addr: SocketAddr, participants: Vec<SocketAddr>) {
    let socket = UdpSocket::bind(relay_addr).await.unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            let Ok((len, _from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            for target in &participants {
                let _ = socket.send_to(&buf[..len], *target).await;
            }
        }
    });
}

async fn next_message(rx: &mut mpsc::Receiver<IncomingMessage>) -> IncomingMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("message did not arrive in time")
        .expect("incoming channel closed")
}

#[tokio::test]
async fn s1_discovery_and_eviction() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let port = 19990;
    let addr_a = loopback(2, port);
    let addr_b = loopback(3, port);

    let (a, _a_rx) = Engine::start(test_config(2, port, dir_a.path())).await.unwrap();
    let (b, _b_rx) = Engine::start(test_config(3, port, dir_b.path())).await.unwrap();

    introduce(a.peer_id(), addr_a, b.peer_id(), addr_b).await;

    let a_peers = a.peers().await;
    let b_peers = b.peers().await;
    assert!(a_peers.iter().any(|(id, _)| *id == b.peer_id()));
    assert!(b_peers.iter().any(|(id, _)| *id == a.peer_id()));

    // B goes silent; A's reaper should evict it once the inactivity
    // threshold elapses.
    b.shutdown();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let a_peers_after = a.peers().await;
    assert!(!a_peers_after.iter().any(|(id, _)| *id == b.peer_id()));

    a.shutdown();
}

#[tokio::test]
async fn s2_unicast_message() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let port = 19991;
    let addr_a = loopback(2, port);
    let addr_b = loopback(3, port);

    let (a, _a_rx) = Engine::start(test_config(2, port, dir_a.path())).await.unwrap();
    let (b, mut b_rx) = Engine::start(test_config(3, port, dir_b.path())).await.unwrap();

    introduce(a.peer_id(), addr_a, b.peer_id(), addr_b).await;

    a.send_message(b.peer_id(), "hola").await.unwrap();

    let delivered = next_message(&mut b_rx).await;
    assert_eq!(delivered.from, a.peer_id());
    assert_eq!(delivered.text, "hola");
    assert!(!delivered.broadcast);
    assert!(delivered.group.is_none());

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn s3_broadcast_message_reaches_every_listener() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let dir_c = tempfile::tempdir().unwrap();
    let port = 19995;
    let addr_a = loopback(2, port);
    let addr_b = loopback(3, port);
    let addr_c = loopback(4, port);
    let relay_addr = loopback(9, port);

    spawn_broadcast_relay(relay_addr, vec![addr_a, addr_b, addr_c]).await;

    let mut config_a = test_config(2, port, dir_a.path());
    config_a.broadcast_addr = relay_addr.ip();
    let mut config_b = test_config(3, port, dir_b.path());
    config_b.broadcast_addr = relay_addr.ip();
    let mut config_c = test_config(4, port, dir_c.path());
    config_c.broadcast_addr = relay_addr.ip();

    let (a, _a_rx) = Engine::start(config_a).await.unwrap();
    let (b, mut b_rx) = Engine::start(config_b).await.unwrap();
    let (c, mut c_rx) = Engine::start(config_c).await.unwrap();

    a.send_broadcast("hi").await.unwrap();

    let at_b = next_message(&mut b_rx).await;
    assert_eq!(at_b.from, a.peer_id());
    assert_eq!(at_b.text, "hi");
    assert!(at_b.broadcast);

    let at_c = next_message(&mut c_rx).await;
    assert_eq!(at_c.from, a.peer_id());
    assert_eq!(at_c.text, "hi");
    assert!(at_c.broadcast);

    a.shutdown();
    b.shutdown();
    c.shutdown();
}

#[tokio::test]
async fn s4_group_message_reaches_only_members() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let dir_c = tempfile::tempdir().unwrap();
    let port = 19992;
    let addr_a = loopback(2, port);
    let addr_b = loopback(3, port);
    let addr_c = loopback(4, port);
    let relay_addr = loopback(9, port);

    spawn_broadcast_relay(relay_addr, vec![addr_a, addr_b, addr_c]).await;

    let mut config_a = test_config(2, port, dir_a.path());
    config_a.broadcast_addr = relay_addr.ip();
    let mut config_b = test_config(3, port, dir_b.path());
    config_b.broadcast_addr = relay_addr.ip();
    let mut config_c = test_config(4, port, dir_c.path());
    config_c.broadcast_addr = relay_addr.ip();

    let (a, _a_rx) = Engine::start(config_a).await.unwrap();
    let (b, mut b_rx) = Engine::start(config_b).await.unwrap();
    let (c, mut c_rx) = Engine::start(config_c).await.unwrap();

    let name = GroupName::new("dev").unwrap();
    a.create_group(name.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    b.join_group(name.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    a.send_group_message(&name, "x").await.unwrap();

    let delivered = next_message(&mut b_rx).await;
    assert_eq!(delivered.text, "x");
    assert_eq!(delivered.group, Some(name));

    let nothing = tokio::time::timeout(Duration::from_millis(300), c_rx.recv()).await;
    assert!(nothing.is_err(), "C knows of the group but never joined it and must not receive anything");

    a.shutdown();
    b.shutdown();
    c.shutdown();
}

#[tokio::test]
async fn s5_file_transfer_is_byte_identical() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let port = 19993;
    let addr_a = loopback(2, port);
    let addr_b = loopback(3, port);

    let (a, _a_rx) = Engine::start(test_config(2, port, dir_a.path())).await.unwrap();
    let (b, mut b_rx) = Engine::start(test_config(3, port, dir_b.path())).await.unwrap();

    introduce(a.peer_id(), addr_a, b.peer_id(), addr_b).await;

    let mut events = b.subscribe();

    let payload: Vec<u8> = (0..10_240u32).map(|n| (n % 251) as u8).collect();
    let source_path = dir_a.path().join("payload.bin");
    tokio::fs::write(&source_path, &payload).await.unwrap();

    a.send_file(b.peer_id(), &source_path).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("file event did not arrive in time")
        .unwrap();
    let received_path = match event {
        EngineEvent::FileReceived { path, size, .. } => {
            assert_eq!(size, payload.len() as u64);
            path
        }
        other => panic!("expected FileReceived, got {other:?}"),
    };

    let on_disk = tokio::fs::read(&received_path).await.unwrap();
    assert_eq!(on_disk, payload);

    let nothing = tokio::time::timeout(Duration::from_millis(50), b_rx.recv()).await;
    assert!(nothing.is_err(), "a file transfer must not also arrive on the text-message stream");

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn s6_message_to_silent_peer_times_out() {
    let dir_a = tempfile::tempdir().unwrap();
    let port = 19994;
    let addr_a = loopback(2, port);

    let (a, _a_rx) = Engine::start(test_config(2, port, dir_a.path())).await.unwrap();

    // A fake peer that never acks: just a bare socket bound to its own
    // address, registered with A via a real echo so `peers.lookup` succeeds.
    let silent_addr = loopback(5, port);
    let _silent_socket = UdpSocket::bind(silent_addr).await.unwrap();
    let silent_peer = PeerId::generate();

    introduce(a.peer_id(), addr_a, silent_peer, silent_addr).await;

    let started = std::time::Instant::now();
    let result = a.send_message(silent_peer, "anyone there?").await;
    assert!(result.is_err(), "send to a silent peer must fail");
    assert!(started.elapsed() >= Duration::from_millis(700));

    a.shutdown();
}
