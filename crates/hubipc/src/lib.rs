//! Inter-process messaging for home-automation services.
//!
//! hubipc connects the services of one host over loopback sockets. A service
//! answers requests on its own TCP port and announces state changes as JSON
//! events on a shared multicast channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: Loopback stream and multicast sockets with interruptible waits
//! - [`frame`]: Code + length-prefixed envelope codec
//! - [`pool`]: Bounded worker pools
//! - [`service`]: Request sender and pooled request receiver
//! - [`events`]: Event producer and adapter-dispatching consumer

/// Re-export transport types.
pub mod transport {
    pub use hubipc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hubipc_frame::*;
}

/// Re-export worker pool types.
pub mod pool {
    pub use hubipc_pool::*;
}

/// Re-export request/response service types.
pub mod service {
    pub use hubipc_service::*;
}

/// Re-export event types.
pub mod events {
    pub use hubipc_events::*;
}

pub use hubipc_frame::Envelope;
