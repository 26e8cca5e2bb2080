//! Loopback socket transport for hubipc.
//!
//! Hides the difference between connecting as a client, establishing as a
//! server and joining the broadcast event channel:
//! - [`Connection`]: outbound or accepted stream socket (`Read + Write`)
//! - [`Listener`]: listening stream socket with interruptible accept
//! - [`Publisher`] / [`Subscriber`]: loopback-scoped UDP multicast
//!
//! Every blocking wait goes through [`wait_ready`], which can also watch a
//! [`Waker`] self-pipe so another thread can interrupt it. Closing a listener
//! or subscriber is two-phase: [`close`] only tickles the pipe and the thread
//! blocked on the socket releases it.
//!
//! This is the lowest layer of hubipc. Everything else builds on top of it.

pub mod error;
#[cfg(unix)]
pub mod multicast;
#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
mod sys;
#[cfg(unix)]
pub mod table;
#[cfg(unix)]
pub mod tcp;
#[cfg(unix)]
pub mod waker;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use multicast::{
    EventChannelConfig, Publisher, Subscriber, DEFAULT_EVENT_GROUP, DEFAULT_EVENT_PORT,
    DEFAULT_RECV_BUFFER,
};
#[cfg(unix)]
pub use poll::{wait_ready, Interest, Readiness};
#[cfg(unix)]
pub use table::{close, ConnectionId, ConnectionKind};
#[cfg(unix)]
pub use tcp::{Connection, Listener, ListenerCloser, DEFAULT_CONNECT_TIMEOUT, LISTEN_BACKLOG};
#[cfg(unix)]
pub use waker::Waker;
