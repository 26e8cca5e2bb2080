use hubipc_pool::PoolError;
use hubipc_transport::TransportError;

/// Errors that can occur while producing or consuming events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The event channel could not be opened or used.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The document is not valid JSON or a header field has the wrong type.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Events must be JSON objects.
    #[error("event document is not a JSON object")]
    NotAnObject,

    /// The producer or consumer has been shut down.
    #[error("event channel is shut down")]
    ShutDown,

    /// Worker pool error.
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// The reader thread could not be spawned.
    #[error("failed to spawn event reader: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EventError>;
