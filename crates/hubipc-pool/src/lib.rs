//! Bounded worker thread pool.
//!
//! Receivers run one pool per listening port; the event consumer runs a
//! default pool plus optional per-service pools. Threads are plain OS
//! threads, grown on demand between a minimum and a maximum and retired
//! after an idle period.

pub mod error;
pub mod pool;

pub use error::{PoolError, Result};
pub use pool::{PoolConfig, PoolStats, WorkerPool, DEFAULT_KEEP_ALIVE};
