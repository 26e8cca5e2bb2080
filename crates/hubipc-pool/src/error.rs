/// Errors returned when handing work to a [`crate::WorkerPool`].
///
/// A rejected job is dropped before the error is returned, so anything it
/// owned has already been released.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The queue is at capacity.
    #[error("pool {pool} queue full ({capacity} jobs)")]
    QueueFull { pool: String, capacity: usize },

    /// The pool has been destroyed.
    #[error("pool {pool} is shut down")]
    ShutDown { pool: String },

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PoolError>;
