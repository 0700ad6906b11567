//! Domain types for the LCP protocol.
//!
//! All wire-level identifiers are newtypes — thin wrappers around fixed-size
//! byte arrays that give them distinct identities in the type system. This
//! prevents accidentally passing a `FileId` where a `PeerId` is expected,
//! which would compile fine if both were plain `[u8; N]`.

use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// PeerId — uniquely (and randomly) identifies a node on the LAN
// ---------------------------------------------------------------------------

/// A 20-byte identifier for a node, generated once at process start.
///
/// Unlike the reference daemon's UUID-based `PeerId`, LCP peer identifiers
/// are not persisted and carry no cryptographic meaning (see spec Non-goals):
/// they exist only to tell nodes apart for the lifetime of a process.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// The reserved "all peers" sentinel. Never a valid generated `PeerId`.
    pub const BROADCAST: PeerId = PeerId([0xFF; 20]);

    /// Wraps a raw 20-byte identifier as-is (used by the codec when decoding
    /// frames off the wire, where `BROADCAST` is a legitimate value).
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Generates a new random `PeerId`, re-rolling in the vanishingly
    /// unlikely case the all-ones `BROADCAST` sentinel comes up.
    pub fn generate() -> Self {
        loop {
            let id = Self(rand::random());
            if id != Self::BROADCAST {
                return id;
            }
        }
    }

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// A short hex prefix, handy for log lines and console output where the
    /// full 40 hex characters would be noise.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

// ---------------------------------------------------------------------------
// FileId — sender-chosen opaque handle for a single file transfer
// ---------------------------------------------------------------------------

/// An 8-byte identifier chosen by the sender for one file transfer.
///
/// Only required to be unique within the sender for the lifetime of the
/// pending transfer; collisions across unrelated senders are fine because
/// pending-file records are keyed in combination with the sender's address
/// at the TCP accept step (see `file_server`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId([u8; 8]);

impl FileId {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// MessageId — 1-byte correlator between a header and its body
// ---------------------------------------------------------------------------

/// Correlates a message header with its following body datagram.
///
/// Deliberately a bare `u8`, not a newtype: the wire format only ever
/// carries one byte here, and a sender is expected to serialize its own
/// flows (see spec §5), so there is no risk of confusing it with a
/// different kind of identifier the way there would be with `PeerId`.
pub type MessageId = u8;

// ---------------------------------------------------------------------------
// GroupName — validated, trimmed group identifier
// ---------------------------------------------------------------------------

/// A group name as seen on the wire and in the group registry.
///
/// Case is preserved; only surrounding whitespace is trimmed on ingress.
/// The 59-byte cap matches the space available after the 41-byte header
/// prefix in a `CREAR_GRUPO`/`UNIRSE_A_GRUPO` frame; `MENSAJE_GRUPAL`
/// frames have a tighter 50-byte trailer, checked separately by the codec
/// via [`GroupName::fits_in_trailer`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupName(String);

/// Errors that can occur when validating a `GroupName`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupNameError {
    #[error("group name cannot be empty")]
    Empty,
    #[error("group name cannot exceed {max} bytes (got {got})")]
    TooLong { max: usize, got: usize },
}

impl GroupName {
    /// Maximum length accepted on the wire for create/join frames.
    pub const MAX_LENGTH: usize = 59;
    /// Maximum length that also fits the 50-byte group-message trailer.
    pub const TRAILER_LENGTH: usize = 50;

    /// Creates a validated `GroupName`, trimming surrounding whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self, GroupNameError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(GroupNameError::Empty);
        }
        if name.len() > Self::MAX_LENGTH {
            return Err(GroupNameError::TooLong {
                max: Self::MAX_LENGTH,
                got: name.len(),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this name's UTF-8 byte length fits the 50-byte trailer used
    /// by `MENSAJE_GRUPAL` frames.
    pub fn fits_in_trailer(&self) -> bool {
        self.0.len() <= Self::TRAILER_LENGTH
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Op — the six operation codes carried in byte 40 of a header
// ---------------------------------------------------------------------------

/// The operation code in byte 40 of an LCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Echo = 0,
    Message = 1,
    File = 2,
    GroupCreate = 3,
    GroupJoin = 4,
    GroupMessage = 5,
}

impl Op {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Op::Echo),
            1 => Ok(Op::Message),
            2 => Ok(Op::File),
            3 => Ok(Op::GroupCreate),
            4 => Ok(Op::GroupJoin),
            5 => Ok(Op::GroupMessage),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseStatus — the status byte in a 25-byte standard response
// ---------------------------------------------------------------------------

/// The status byte carried in a 25-byte standard response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok = 0,
    InvalidRequest = 1,
    InternalError = 2,
}

impl ResponseStatus {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ResponseStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResponseStatus::Ok),
            1 => Ok(ResponseStatus::InvalidRequest),
            2 => Ok(ResponseStatus::InternalError),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
