//! Wire encode/decode for LCP frames.
//!
//! Every frame on the wire has a fixed byte layout (see spec §6); there is no
//! length-prefixed or self-describing framing the way the reference
//! daemon's MessagePack protocol has. The functions here are pure —
//! `Vec<u8>` in, `Vec<u8>` out — and never touch a socket, mirroring the
//! `encode`/`decode` split of the reference `protocol.rs`.

use std::convert::TryInto;

use thiserror::Error;

use crate::types::{FileId, GroupName, GroupNameError, Op, PeerId, ResponseStatus};

/// Size of a UDP header frame, in bytes.
pub const HEADER_LEN: usize = 100;
/// Width of the group-name area used by ops 3/4 (group create/join), starting at offset 41.
pub const GROUP_NAME_AT_41_LEN: usize = 59;
/// Width of the trailer area (offset 50..100) shared by ordinary frames and op 5's group name.
pub const TRAILER_LEN: usize = 50;
/// Size of a standard 25-byte UDP response.
pub const RESPONSE_LEN: usize = 25;
/// Maximum UTF-8 payload size for a message body.
pub const MAX_MESSAGE_PAYLOAD: usize = 1024;

/// Errors raised while decoding a frame off the wire.
///
/// Encoding never fails: every value handed to the encode functions has
/// already been validated by its own type (`GroupName`, payload-size checks
/// at the call site), so there is no `CodecError` variant for it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame too short: expected at least {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },
    #[error("frame has unexpected length: expected {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("unknown operation code {0}")]
    UnknownOp(u8),
    #[error("unknown response status {0}")]
    UnknownStatus(u8),
    #[error("group name invalid: {0}")]
    GroupName(#[from] GroupNameError),
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("message payload of {got} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { max: usize, got: usize },
    #[error("message body is blank or contains only control characters")]
    BlankOrControlOnly,
}

/// A decoded 100-byte UDP header, common to every operation.
///
/// `sub_id` and `length` are the plain interpretation of offsets 41 and
/// 42..50; `trailer` is the 50 bytes at offset 50..100. For ops 3/4 (group
/// create/join), the group name actually occupies the whole 41..100 span
/// and `sub_id`/`length` are meaningless — use [`group_name_at_41`] on the
/// original datagram bytes instead of this struct's `trailer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub from: PeerId,
    pub to: PeerId,
    pub op: Op,
    pub sub_id: u8,
    pub length: u64,
    pub trailer: [u8; TRAILER_LEN],
}

/// Encodes a 100-byte header frame. `trailer` is copied into offset 50..100,
/// zero-padded if shorter than 50 bytes, and truncated if longer.
pub fn encode_header(from: PeerId, to: PeerId, op: Op, sub_id: u8, length: u64, trailer: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN];
    buf[0..20].copy_from_slice(from.as_bytes());
    buf[20..40].copy_from_slice(to.as_bytes());
    buf[40] = op.as_u8();
    buf[41] = sub_id;
    buf[42..50].copy_from_slice(&length.to_be_bytes());
    let n = trailer.len().min(TRAILER_LEN);
    buf[50..50 + n].copy_from_slice(&trailer[..n]);
    buf
}

/// Decodes the 100-byte header common to every UDP frame.
pub fn decode_header(buf: &[u8]) -> Result<Header, CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::TooShort {
            expected: HEADER_LEN,
            got: buf.len(),
        });
    }
    let from = PeerId::from_bytes(buf[0..20].try_into().unwrap());
    let to = PeerId::from_bytes(buf[20..40].try_into().unwrap());
    let op = Op::try_from(buf[40]).map_err(CodecError::UnknownOp)?;
    let sub_id = buf[41];
    let length = u64::from_be_bytes(buf[42..50].try_into().unwrap());
    let mut trailer = [0u8; TRAILER_LEN];
    trailer.copy_from_slice(&buf[50..100]);
    Ok(Header {
        from,
        to,
        op,
        sub_id,
        length,
        trailer,
    })
}

fn trimmed_utf8(raw: &[u8]) -> Result<&str, CodecError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end]).map_err(|_| CodecError::InvalidUtf8)
}

/// Encodes a header whose group name occupies offsets 41..100 (ops 3/4:
/// group create/join). `sub_id` and `length` carry no meaning for these ops
/// and are written as zero.
pub fn encode_header_with_group_name_at_41(from: PeerId, to: PeerId, op: Op, name: &GroupName) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN];
    buf[0..20].copy_from_slice(from.as_bytes());
    buf[20..40].copy_from_slice(to.as_bytes());
    buf[40] = op.as_u8();
    let bytes = name.as_str().as_bytes();
    let n = bytes.len().min(GROUP_NAME_AT_41_LEN);
    buf[41..41 + n].copy_from_slice(&bytes[..n]);
    buf
}

/// Reads a group name packed at offset 41 (ops 3/4) directly off the raw
/// datagram bytes, trimming zero padding. Must be called on the original
/// buffer, not on a decoded [`Header`], since its `sub_id`/`length` fields
/// overlap this span for these ops.
pub fn group_name_at_41(buf: &[u8]) -> Result<GroupName, CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::TooShort {
            expected: HEADER_LEN,
            got: buf.len(),
        });
    }
    let raw = &buf[41..41 + GROUP_NAME_AT_41_LEN];
    Ok(GroupName::new(trimmed_utf8(raw)?)?)
}

/// Encodes a header whose 50-byte trailer carries a group name (op 5).
pub fn encode_header_with_group_name_in_trailer(
    from: PeerId,
    to: PeerId,
    sub_id: u8,
    length: u64,
    name: &GroupName,
) -> Vec<u8> {
    let mut trailer = [0u8; TRAILER_LEN];
    let bytes = name.as_str().as_bytes();
    let n = bytes.len().min(GroupName::TRAILER_LENGTH);
    trailer[..n].copy_from_slice(&bytes[..n]);
    encode_header(from, to, Op::GroupMessage, sub_id, length, &trailer)
}

/// Reads a group name packed in the 50-byte trailer (op 5).
pub fn group_name_from_trailer(header: &Header) -> Result<GroupName, CodecError> {
    Ok(GroupName::new(trimmed_utf8(&header.trailer)?)?)
}

/// Encodes a file-announce header: `file_id` in the first 8 bytes of the
/// trailer, `expected_size` in the `length` field (per spec §6, "size
/// occupies the same 8-byte length slot used for messages").
pub fn encode_file_announce(from: PeerId, to: PeerId, file_id: FileId, expected_size: u64) -> Vec<u8> {
    let mut trailer = [0u8; TRAILER_LEN];
    trailer[0..8].copy_from_slice(file_id.as_bytes());
    encode_header(from, to, Op::File, 0, expected_size, &trailer)
}

/// Extracts `(file_id, expected_size)` from a decoded file-announce header.
pub fn decode_file_announce(header: &Header) -> (FileId, u64) {
    let file_id_bytes: [u8; 8] = header.trailer[0..8].try_into().unwrap();
    (FileId::from_bytes(file_id_bytes), header.length)
}

/// Encodes a message body: 1-byte `msg_id` followed by a UTF-8 payload.
pub fn encode_body(msg_id: u8, payload: &str) -> Result<Vec<u8>, CodecError> {
    let bytes = payload.as_bytes();
    if bytes.len() > MAX_MESSAGE_PAYLOAD {
        return Err(CodecError::PayloadTooLarge {
            max: MAX_MESSAGE_PAYLOAD,
            got: bytes.len(),
        });
    }
    let mut buf = Vec::with_capacity(1 + bytes.len());
    buf.push(msg_id);
    buf.extend_from_slice(bytes);
    Ok(buf)
}

/// Decodes a message body: `(msg_id, text)`.
///
/// Bodies that are blank after trimming whitespace, or contain only control
/// characters (anything below 0x20 other than `\n`), are rejected rather
/// than delivered — mirrors the reference's receive-side check (`if not
/// mensaje.strip() or any(ord(c) < 32 for c in mensaje if c != '\n')`).
pub fn decode_body(buf: &[u8]) -> Result<(u8, String), CodecError> {
    if buf.is_empty() {
        return Err(CodecError::TooShort { expected: 1, got: 0 });
    }
    let msg_id = buf[0];
    let text = std::str::from_utf8(&buf[1..])
        .map_err(|_| CodecError::InvalidUtf8)?
        .to_string();
    if text.trim().is_empty() || text.chars().any(|c| c != '\n' && (c as u32) < 0x20) {
        return Err(CodecError::BlankOrControlOnly);
    }
    Ok((msg_id, text))
}

/// Encodes a 25-byte standard response.
pub fn encode_response(status: ResponseStatus, from: PeerId) -> Vec<u8> {
    let mut buf = vec![0u8; RESPONSE_LEN];
    buf[0] = status.as_u8();
    buf[1..21].copy_from_slice(from.as_bytes());
    buf
}

/// Decodes a 25-byte standard response into `(status, from)`.
pub fn decode_response(buf: &[u8]) -> Result<(ResponseStatus, PeerId), CodecError> {
    if buf.len() != RESPONSE_LEN {
        return Err(CodecError::WrongLength {
            expected: RESPONSE_LEN,
            got: buf.len(),
        });
    }
    let status = ResponseStatus::try_from(buf[0]).map_err(CodecError::UnknownStatus)?;
    let from = PeerId::from_bytes(buf[1..21].try_into().unwrap());
    Ok((status, from))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 20])
    }

    #[test]
    fn header_roundtrip() {
        let from = peer(1);
        let to = peer(2);
        let mut trailer = [0u8; TRAILER_LEN];
        trailer[0] = 7;
        let encoded = encode_header(from, to, Op::Message, 42, 11, &trailer);
        assert_eq!(encoded.len(), HEADER_LEN);
        let decoded = decode_header(&encoded).unwrap();
        assert_eq!(decoded.from, from);
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.op, Op::Message);
        assert_eq!(decoded.sub_id, 42);
        assert_eq!(decoded.length, 11);
        assert_eq!(decoded.trailer[0], 7);
    }

    #[test]
    fn decode_header_rejects_short_frame() {
        let buf = vec![0u8; 40];
        assert_eq!(
            decode_header(&buf),
            Err(CodecError::TooShort { expected: 100, got: 40 })
        );
    }

    #[test]
    fn decode_header_rejects_unknown_op() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[40] = 9;
        assert_eq!(decode_header(&buf), Err(CodecError::UnknownOp(9)));
    }

    #[test]
    fn group_name_at_41_roundtrip() {
        let name = GroupName::new("dev-team").unwrap();
        let encoded = encode_header_with_group_name_at_41(peer(1), PeerId::BROADCAST, Op::GroupCreate, &name);
        assert_eq!(group_name_at_41(&encoded).unwrap(), name);
    }

    #[test]
    fn group_name_in_trailer_roundtrip() {
        let name = GroupName::new("dev").unwrap();
        let encoded = encode_header_with_group_name_in_trailer(peer(1), PeerId::BROADCAST, 3, 5, &name);
        let header = decode_header(&encoded).unwrap();
        assert_eq!(group_name_from_trailer(&header).unwrap(), name);
    }

    #[test]
    fn file_announce_roundtrip() {
        let file_id = FileId::from_bytes([9, 1, 2, 3, 4, 5, 6, 7]);
        let encoded = encode_file_announce(peer(1), peer(2), file_id, 10_240);
        let header = decode_header(&encoded).unwrap();
        let (decoded_id, size) = decode_file_announce(&header);
        assert_eq!(decoded_id, file_id);
        assert_eq!(size, 10_240);
    }

    #[test]
    fn body_roundtrip() {
        let encoded = encode_body(5, "hola").unwrap();
        let (msg_id, text) = decode_body(&encoded).unwrap();
        assert_eq!(msg_id, 5);
        assert_eq!(text, "hola");
    }

    #[test]
    fn body_rejects_oversized_payload() {
        let payload = "a".repeat(MAX_MESSAGE_PAYLOAD + 1);
        assert_eq!(
            encode_body(1, &payload),
            Err(CodecError::PayloadTooLarge {
                max: MAX_MESSAGE_PAYLOAD,
                got: MAX_MESSAGE_PAYLOAD + 1
            })
        );
    }

    #[test]
    fn body_rejects_invalid_utf8() {
        let buf = vec![1, 0xFF, 0xFE];
        assert_eq!(decode_body(&buf), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn body_rejects_control_characters_only() {
        let encoded = encode_body(1, "\x01\x02").unwrap();
        assert_eq!(decode_body(&encoded), Err(CodecError::BlankOrControlOnly));
    }

    #[test]
    fn body_rejects_blank_after_trim() {
        let encoded = encode_body(1, "   \t  ").unwrap();
        assert_eq!(decode_body(&encoded), Err(CodecError::BlankOrControlOnly));
    }

    #[test]
    fn body_allows_trailing_newline() {
        let encoded = encode_body(1, "hola\n").unwrap();
        let (_, text) = decode_body(&encoded).unwrap();
        assert_eq!(text, "hola\n");
    }

    #[test]
    fn response_roundtrip() {
        let from = peer(3);
        let encoded = encode_response(ResponseStatus::Ok, from);
        assert_eq!(encoded.len(), RESPONSE_LEN);
        let (status, decoded_from) = decode_response(&encoded).unwrap();
        assert_eq!(status, ResponseStatus::Ok);
        assert_eq!(decoded_from, from);
    }

    #[test]
    fn response_rejects_wrong_length() {
        let buf = vec![0u8; 10];
        assert_eq!(
            decode_response(&buf),
            Err(CodecError::WrongLength { expected: 25, got: 10 })
        );
    }
}
