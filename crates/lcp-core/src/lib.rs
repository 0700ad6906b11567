//! # lcp-core
//!
//! Wire protocol, registries, and node engine for LCP — a decentralized
//! peer-to-peer LAN chat and file-transfer protocol sharing one UDP/TCP
//! port. Peers discover each other by broadcast echo, exchange unicast or
//! broadcast messages via a header-then-body handshake, replicate named
//! group membership, and transfer files with a UDP announce followed by a
//! TCP stream.
//!
//! [`Engine`] is the crate's single entry point: it owns both sockets and
//! every background task, and exposes the Sender API plus an event stream
//! for a collaborator (a console, a test, a headless daemon) to drive.

pub mod codec;
pub mod config;
pub mod demux;
pub mod engine;
pub mod file_server;
mod handlers;
pub mod group_registry;
pub mod peer_registry;
pub mod pending;
pub mod types;

pub use config::NodeConfig;
pub use engine::{Engine, EngineError, EngineEvent, IncomingMessage};
