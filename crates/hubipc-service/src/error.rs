use bytes::Bytes;
use hubipc_frame::code as codes;
use hubipc_frame::FrameError;
use hubipc_pool::PoolError;
use hubipc_transport::TransportError;

/// Errors that can occur in sender and receiver operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Transport-level error (connect, bind, listener setup).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Writing the request failed.
    #[error("send failed: {0}")]
    Send(#[source] FrameError),

    /// Reading an envelope failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The peer answered with a reserved failure code.
    #[error("peer reported {} ({code})", codes::code_name(*code))]
    Remote { code: i32, payload: Bytes },

    /// Worker pool error.
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// The receiver is no longer running.
    #[error("receiver already shut down")]
    AlreadyShutdown,

    /// A service thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl ServiceError {
    /// Reserved status code describing this failure.
    ///
    /// A remote failure reports the peer's own code, so callers can tell a
    /// transport failure from one the peer reported.
    pub fn status_code(&self) -> i32 {
        match self {
            ServiceError::Transport(TransportError::Connect { .. }) => codes::CONNECT_ERROR,
            ServiceError::Transport(TransportError::Timeout) => codes::TIMEOUT,
            ServiceError::Transport(TransportError::Shutdown) => codes::SERVICE_DISABLED,
            ServiceError::Transport(_) => codes::GENERAL_ERROR,
            ServiceError::Send(FrameError::Timeout) => codes::TIMEOUT,
            ServiceError::Send(FrameError::ServiceDisabled) => codes::SERVICE_DISABLED,
            ServiceError::Send(_) => codes::SEND_ERROR,
            ServiceError::Frame(err) => err.status_code(),
            ServiceError::Remote { code, .. } => *code,
            ServiceError::AlreadyShutdown => codes::SERVICE_DISABLED,
            ServiceError::Pool(_) | ServiceError::Spawn(_) => codes::GENERAL_ERROR,
        }
    }

    /// Whether this failure means the target is shutting down or shut down.
    pub fn is_shutdown(&self) -> bool {
        self.status_code() == codes::SERVICE_DISABLED
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use super::*;

    #[test]
    fn status_codes_distinguish_failure_kinds() {
        let connect = ServiceError::Transport(TransportError::Connect {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 1)),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        });
        assert_eq!(connect.status_code(), codes::CONNECT_ERROR);

        let send = ServiceError::Send(FrameError::ConnectionClosed);
        assert_eq!(send.status_code(), codes::SEND_ERROR);

        let read = ServiceError::Frame(FrameError::ConnectionClosed);
        assert_eq!(read.status_code(), codes::READ_ERROR);

        let timeout = ServiceError::Frame(FrameError::Timeout);
        assert_eq!(timeout.status_code(), codes::TIMEOUT);

        let woken = ServiceError::Send(FrameError::ServiceDisabled);
        assert!(woken.is_shutdown());
    }

    #[test]
    fn remote_failure_keeps_peer_code() {
        let err = ServiceError::Remote {
            code: codes::INVALID_REQUEST,
            payload: Bytes::from_static(b"bad"),
        };
        assert_eq!(err.status_code(), codes::INVALID_REQUEST);
        assert_eq!(err.to_string(), "peer reported INVALID_REQUEST (6)");
    }
}
