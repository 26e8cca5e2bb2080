//! Request/response envelopes for hubipc.
//!
//! Every message on a request connection is framed as:
//! - a 4-byte big-endian signed message code
//! - a 4-byte big-endian unsigned payload length
//! - exactly `length` payload bytes
//!
//! The layout is shared with the non-Rust services on the same host, so it
//! carries no magic or version field. No partial reads, no buffer management
//! in user code.

pub mod code;
pub mod codec;
pub mod error;
#[cfg(unix)]
pub mod exchange;
pub mod reader;
pub mod writer;

pub use code::{
    is_failure, CONNECT_ERROR, GENERAL_ERROR, INVALID_REQUEST, PING_REQUEST, PING_RESPONSE,
    READ_ERROR, SEND_ERROR, SERVICE_DISABLED, SHUTDOWN_REQUESTED, SUCCESS, TIMEOUT,
};
pub use codec::{
    decode_envelope, encode_envelope, Envelope, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
#[cfg(unix)]
pub use exchange::{accept_envelope, recv_envelope, send_envelope};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;
