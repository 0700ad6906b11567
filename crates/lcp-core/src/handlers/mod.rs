//! Per-operation worker tasks fed by the UDP demultiplexer's queues.
//!
//! Each submodule owns the receiving half of one (or a closely related
//! pair of) [`crate::demux::Datagram`] queues and runs until the shared
//! shutdown signal fires, matching the "dedicated workers per queue" shape
//! from spec §4.D.

pub mod echo;
pub mod file_announce;
pub mod group;
pub mod message;
