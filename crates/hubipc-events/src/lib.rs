//! Broadcast events for hubipc.
//!
//! Services publish JSON objects on a loopback multicast channel with an
//! [`EventProducer`]. An [`EventConsumer`] runs one reader thread per process
//! and dispatches every event to the [`EventAdapter`] registered for the
//! originating service id, plus an optional subscribe-all adapter, on a
//! worker pool.
//!
//! Delivery is best-effort. Nothing is acknowledged or retransmitted, and an
//! event that arrives while its pool is full is dropped with a warning.

pub mod adapter;
#[cfg(unix)]
pub mod consumer;
pub mod error;
pub mod event;
#[cfg(unix)]
pub mod producer;

pub use adapter::EventAdapter;
#[cfg(unix)]
pub use consumer::{ConsumerConfig, EventConsumer, DEFAULT_POLL_INTERVAL};
pub use error::{EventError, Result};
pub use event::{
    next_event_id, service_id_of, BaseEvent, EVENT_CODE_KEY, EVENT_ID_KEY, EVENT_TIME_KEY,
    EVENT_VALUE_KEY, SERVICE_ID_KEY, SUBSCRIBE_ALL,
};
#[cfg(unix)]
pub use producer::EventProducer;
