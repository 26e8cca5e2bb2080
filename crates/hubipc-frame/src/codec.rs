use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::code::{PING_REQUEST, PING_RESPONSE};
use crate::error::{FrameError, Result};

/// Envelope header: code (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A request or response message.
///
/// The envelope owns its payload. An absent payload is an empty buffer, which
/// is distinct from a payload holding the text `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Application message code (negative values are reserved).
    pub code: i32,
    /// The message payload, conventionally UTF-8 JSON.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(code: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Create an envelope with no payload.
    pub fn empty(code: i32) -> Self {
        Self {
            code,
            payload: Bytes::new(),
        }
    }

    /// Create an envelope whose payload is the serialized JSON document.
    pub fn json(code: i32, value: &serde_json::Value) -> Self {
        Self::new(code, value.to_string())
    }

    /// A liveness probe.
    pub fn ping() -> Self {
        Self::empty(PING_REQUEST)
    }

    /// The answer to a liveness probe.
    pub fn pong() -> Self {
        Self::empty(PING_RESPONSE)
    }

    /// Whether this is a liveness probe.
    pub fn is_ping(&self) -> bool {
        self.code == PING_REQUEST
    }

    /// Whether the payload holds any bytes.
    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Payload as text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Parse the payload as a JSON document.
    pub fn payload_json(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// The total wire size of this envelope (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode an envelope into the wire format.
///
/// Wire format (network byte order):
/// ```text
/// ┌──────────────┬──────────────┬─────────────────┐
/// │ Code         │ Length       │ Payload          │
/// │ (4B i32 BE)  │ (4B u32 BE)  │ (Length bytes)   │
/// └──────────────┴──────────────┴─────────────────┘
/// ```
pub fn encode_envelope(envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
    let len = envelope.payload.len();
    if len > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + len);
    dst.put_i32(envelope.code);
    dst.put_u32(len as u32);
    dst.put_slice(&envelope.payload);
    Ok(())
}

/// Decode an envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes the envelope bytes from the buffer.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Envelope>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = &src[..HEADER_SIZE];
    let code = header.get_i32();
    let payload_len = header.get_u32() as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Envelope { code, payload }))
}

/// Configuration for envelope exchange.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
