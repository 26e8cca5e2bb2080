use hubipc_transport::TransportError;

use crate::code;

/// Errors that can occur while exchanging envelopes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing envelopes.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete envelope was exchanged.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,

    /// The socket did not become ready within the timeout.
    #[error("timed out waiting for peer")]
    Timeout,

    /// The wait was interrupted by an explicit shutdown.
    #[error("service disabled")]
    ServiceDisabled,

    /// Lower-level transport failure.
    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for FrameError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => FrameError::Timeout,
            TransportError::Shutdown => FrameError::ServiceDisabled,
            TransportError::Io(io) => FrameError::Io(io),
            other => FrameError::Transport(other),
        }
    }
}

impl FrameError {
    /// Reserved status code describing this failure.
    pub fn status_code(&self) -> i32 {
        match self {
            FrameError::Timeout => code::TIMEOUT,
            FrameError::ServiceDisabled => code::SERVICE_DISABLED,
            FrameError::ConnectionClosed => code::READ_ERROR,
            FrameError::PayloadTooLarge { .. } => code::INVALID_REQUEST,
            FrameError::Io(err) if is_timeout_kind(err.kind()) => code::TIMEOUT,
            FrameError::Io(_) => code::READ_ERROR,
            FrameError::Transport(TransportError::Connect { .. }) => code::CONNECT_ERROR,
            FrameError::Transport(_) => code::GENERAL_ERROR,
        }
    }
}

pub(crate) fn is_timeout_kind(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

pub type Result<T> = std::result::Result<T, FrameError>;
