// ABOUTME: Wire-level encode/decode for the Push binary framing protocol
// ABOUTME: Pure functions over bytes; no I/O, no knowledge of sockets or sessions

use std::io::Cursor;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Size of the common 6-byte frame header: `<u16 frame_type><u32 body_length>`.
pub const HEADER_SIZE: usize = 6;

/// Status code returned in a `ConnectionResponse` / sent in a `PublishMessageReceived`.
pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 403;

/// Protocol version advertised in every `ConnectionRequest`.
const PROTOCOL_VERSION: u16 = 0x0001;

/// The four frame types defined by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum FrameType {
    ConnectionRequest = 0x0001,
    ConnectionResponse = 0x0002,
    PublishMessage = 0x0003,
    PublishMessageReceived = 0x0004,
}

/// Errors raised while decoding a frame from a byte buffer.
///
/// `Incomplete` is an expected, routine condition (not enough bytes have
/// arrived yet) and must never be logged as an error by callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("incomplete frame: need more data")]
    Incomplete,

    #[error("unknown frame type: {0:#06x}")]
    UnknownFrameType(u16),

    #[error("unexpected frame type: expected {expected:?}, got {actual:?}")]
    UnexpectedFrameType { expected: FrameType, actual: FrameType },

    #[error("body too short: need at least {need} bytes, have {have}")]
    BodyTooShort { need: usize, have: usize },

    #[error("unexpected compression code: {0:#04x}")]
    UnknownCompression(u8),
}

/// The decoded common header shared by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub body_length: u32,
}

impl FrameHeader {
    /// Attempt to decode a 6-byte header from `buf`. Does not advance `buf`
    /// unless the header decodes successfully.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(CodecError::Incomplete);
        }
        let start = buf.position();
        let raw_type = buf.get_u16();
        let body_length = buf.get_u32();
        let frame_type = match FrameType::try_from(raw_type) {
            Ok(t) => t,
            Err(_) => {
                buf.set_position(start);
                return Err(CodecError::UnknownFrameType(raw_type));
            }
        };
        Ok(FrameHeader { frame_type, body_length })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.frame_type as u16);
        buf.put_u32(self.body_length);
    }
}

/// `ConnectionRequest` (0x0001) — client to server handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub username: String,
    pub password: String,
    pub monitor_id: u32,
}

impl ConnectionRequest {
    pub fn encode(&self) -> Bytes {
        let username = self.username.as_bytes();
        let password = self.password.as_bytes();
        let body_length = 2 + 2 + username.len() + 2 + password.len() + 4;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_length);
        FrameHeader {
            frame_type: FrameType::ConnectionRequest,
            body_length: body_length as u32,
        }
        .encode(&mut buf);

        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u16(username.len() as u16);
        buf.put_slice(username);
        buf.put_u16(password.len() as u16);
        buf.put_slice(password);
        buf.put_u32(self.monitor_id);

        buf.freeze()
    }
}

/// `ConnectionResponse` (0x0002) — server's reply to a handshake request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionResponse {
    pub status: u16,
}

impl ConnectionResponse {
    /// Decode the 4-byte body (reserved u16 + status u16) from `buf`.
    pub fn decode_body(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        if buf.remaining() < 4 {
            return Err(CodecError::BodyTooShort { need: 4, have: buf.remaining() });
        }
        let _reserved = buf.get_u16();
        let status = buf.get_u16();
        Ok(ConnectionResponse { status })
    }
}

/// `PublishMessage` (0x0003) — server-originated event delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    pub block_id: u16,
    pub compression: u8,
    /// Raw payload bytes, still compressed if `compression != 0`.
    pub raw_payload: Bytes,
}

/// Offset of the payload within a `PublishMessage` body.
const PUBLISH_PAYLOAD_OFFSET: usize = 10;

impl PublishMessage {
    /// Decode the full body (`body_length` bytes, already known to be
    /// buffered) starting at body offset 0.
    pub fn decode_body(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < PUBLISH_PAYLOAD_OFFSET {
            return Err(CodecError::BodyTooShort { need: PUBLISH_PAYLOAD_OFFSET, have: body.len() });
        }
        let mut cursor = Cursor::new(body);
        let block_id = cursor.get_u16();
        let _reserved = cursor.get_u16();
        let compression = cursor.get_u8();
        // 5 further reserved/header bytes, skipped.
        let payload = Bytes::copy_from_slice(&body[PUBLISH_PAYLOAD_OFFSET..]);
        Ok(PublishMessage { block_id, compression, raw_payload: payload })
    }
}

/// `PublishMessageReceived` (0x0004) — client acknowledgement of a delivered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishMessageReceived {
    pub block_id: u16,
    pub status: u16,
}

impl PublishMessageReceived {
    pub fn ok(block_id: u16) -> Self {
        PublishMessageReceived { block_id, status: STATUS_OK }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + 4);
        FrameHeader { frame_type: FrameType::PublishMessageReceived, body_length: 4 }.encode(&mut buf);
        buf.put_u16(self.block_id);
        buf.put_u16(self.status);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_request_round_trip_matches_literal_scenario() {
        let req = ConnectionRequest {
            username: "u".to_string(),
            password: "p".to_string(),
            monitor_id: 9001,
        };
        let bytes = req.encode();
        // Scenario 1: header 00 01 00 00 00 0F, body 00 01 00 01 "u" 00 01 "p" 00 00 23 29
        assert_eq!(&bytes[0..6], &[0x00, 0x01, 0x00, 0x00, 0x00, 0x0F]);
        assert_eq!(
            &bytes[6..],
            &[0x00, 0x01, 0x00, 0x01, b'u', 0x00, 0x01, b'p', 0x00, 0x00, 0x23, 0x29]
        );
    }

    #[test]
    fn connection_response_decodes_status() {
        let body = [0x00, 0x00, 0x00, 0xC8];
        let mut cursor = Cursor::new(&body[..]);
        let resp = ConnectionResponse::decode_body(&mut cursor).unwrap();
        assert_eq!(resp.status, 200);
    }

    #[test]
    fn connection_response_decodes_auth_failure() {
        let body = [0x00, 0x00, 0x01, 0x93];
        let mut cursor = Cursor::new(&body[..]);
        let resp = ConnectionResponse::decode_body(&mut cursor).unwrap();
        assert_eq!(resp.status, 403);
    }

    #[test]
    fn publish_message_decodes_scenario_3() {
        let body = [0x00, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, b'h', b'i'];
        let msg = PublishMessage::decode_body(&body).unwrap();
        assert_eq!(msg.block_id, 42);
        assert_eq!(msg.compression, 0);
        assert_eq!(&msg.raw_payload[..], b"hi");
    }

    #[test]
    fn publish_message_received_encodes_scenario_3_ack() {
        let ack = PublishMessageReceived::ok(42);
        let bytes = ack.encode();
        assert_eq!(&bytes[..], &[0x00, 0x04, 0x00, 0x00, 0x00, 0x04, 0x00, 0x2A, 0x00, 0xC8]);
    }

    #[test]
    fn header_decode_rejects_unknown_type() {
        let data = [0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00];
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(FrameHeader::decode(&mut cursor), Err(CodecError::UnknownFrameType(0xFFFF)));
    }

    #[test]
    fn header_decode_incomplete_on_short_buffer() {
        let data = [0x00, 0x03];
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(FrameHeader::decode(&mut cursor), Err(CodecError::Incomplete));
    }
}
