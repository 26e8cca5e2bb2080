//! Timed envelope exchange over transport sockets.
//!
//! Each operation first waits (bounded) for socket readiness, also watching
//! the connection's waker if it has one, and only then performs the blocking
//! read or write with the same bound applied as a socket timeout.

use std::time::Duration;

use hubipc_transport::{Connection, Interest, Listener, Readiness};
use tracing::debug;

use crate::codec::{Envelope, FrameConfig};
use crate::error::{is_timeout_kind, FrameError, Result};
use crate::reader::EnvelopeReader;
use crate::writer::EnvelopeWriter;

fn check_ready(readiness: Readiness) -> Result<()> {
    match readiness {
        Readiness::Ready => Ok(()),
        Readiness::TimedOut => Err(FrameError::Timeout),
        Readiness::Woken => Err(FrameError::ServiceDisabled),
    }
}

fn timeout_aware(err: FrameError) -> FrameError {
    match err {
        FrameError::Io(io) if is_timeout_kind(io.kind()) => FrameError::Timeout,
        other => other,
    }
}

/// Send `envelope`, waiting at most `timeout` for the socket to accept it.
///
/// Also used to answer an accepted request: the accepted [`Connection`] is
/// the per-request control block identifying where the response goes.
pub fn send_envelope(
    conn: &mut Connection,
    envelope: &Envelope,
    timeout: Option<Duration>,
) -> Result<()> {
    check_ready(conn.wait(Interest::Writable, timeout)?)?;
    conn.set_write_timeout(timeout)?;

    EnvelopeWriter::new(&mut *conn)
        .write_envelope(envelope)
        .map_err(timeout_aware)?;
    debug!(
        id = %conn.id(),
        code = envelope.code,
        len = envelope.payload.len(),
        "sent envelope"
    );
    Ok(())
}

/// Receive one envelope, waiting at most `timeout` for it to start arriving.
pub fn recv_envelope(
    conn: &mut Connection,
    timeout: Option<Duration>,
    max_payload_size: usize,
) -> Result<Envelope> {
    check_ready(conn.wait(Interest::Readable, timeout)?)?;
    conn.set_read_timeout(timeout)?;

    let config = FrameConfig {
        max_payload_size,
        read_timeout: timeout,
        write_timeout: None,
    };
    let envelope = EnvelopeReader::with_config(&mut *conn, config)
        .read_envelope()
        .map_err(timeout_aware)?;
    debug!(
        id = %conn.id(),
        code = envelope.code,
        len = envelope.payload.len(),
        "received envelope"
    );
    Ok(envelope)
}

/// Accept the next connection on `listener` and read its request.
///
/// The accept wait also watches the listener's self-pipe, so a close from
/// another thread yields [`FrameError::ServiceDisabled`]. When the request
/// cannot be read, the accepted connection is aborted before returning.
pub fn accept_envelope(
    listener: &Listener,
    timeout: Option<Duration>,
    config: &FrameConfig,
) -> Result<(Envelope, Connection)> {
    let mut conn = listener.accept(timeout)?;
    match recv_envelope(&mut conn, config.read_timeout, config.max_payload_size) {
        Ok(envelope) => Ok((envelope, conn)),
        Err(err) => {
            debug!(id = %conn.id(), error = %err, "dropping unreadable request");
            conn.abort();
            Err(err)
        }
    }
}
