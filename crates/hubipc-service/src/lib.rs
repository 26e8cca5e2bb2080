//! Request/response services for hubipc.
//!
//! A [`Receiver`] owns a listening port, an accept thread and a worker pool,
//! and runs a [`RequestHandler`] for every request. A [`Sender`] performs one
//! blocking exchange per call. Both speak the envelope format of
//! `hubipc-frame`.

pub mod control;
pub mod error;
#[cfg(unix)]
pub mod receiver;
pub mod resolver;
#[cfg(unix)]
pub mod sender;

pub use control::{control_response, HandlerStatus, RequestHandler};
pub use error::{Result, ServiceError};
#[cfg(unix)]
pub use receiver::{Receiver, ReceiverConfig, ReceiverState, DEFAULT_READ_TIMEOUT};
pub use resolver::{AddressResolver, LoopbackResolver, StaticResolver};
#[cfg(unix)]
pub use sender::{
    is_available, send_only, send_request, shutdown, wait_for_available, Sender, SenderConfig,
    DEFAULT_POLL_INTERVAL, DEFAULT_WRITE_TIMEOUT,
};
