//! Process-wide table of live connections.
//!
//! Every socket created by this crate registers a control block here so that
//! [`close`] can find and tear down the right connection by id alone.

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::debug;

use crate::waker::Waker;

/// Opaque, process-unique handle for a transport socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw numeric value, for logging.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What kind of socket a table entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Outbound stream opened by [`crate::Connection::connect`].
    Client,
    /// Stream handed out by a listener's accept.
    Accepted,
    /// Listening stream socket.
    Listener,
    /// Multicast publish socket.
    Publisher,
    /// Multicast subscribe socket.
    Subscriber,
}

struct ControlBlock {
    kind: ConnectionKind,
    waker: Option<Arc<Waker>>,
    stream: Option<TcpStream>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn table() -> MutexGuard<'static, HashMap<ConnectionId, ControlBlock>> {
    static TABLE: OnceLock<Mutex<HashMap<ConnectionId, ControlBlock>>> = OnceLock::new();
    TABLE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Register a socket. Sockets with a waker get a two-phase close; the
/// optional stream clone lets [`close`] force a blocked owner out of I/O.
pub(crate) fn register(
    kind: ConnectionKind,
    waker: Option<Arc<Waker>>,
    stream: Option<TcpStream>,
) -> ConnectionId {
    let id = ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
    table().insert(
        id,
        ControlBlock {
            kind,
            waker,
            stream,
        },
    );
    id
}

/// Drop the control block. Called by the owning socket once it is torn down.
pub(crate) fn deregister(id: ConnectionId) {
    table().remove(&id);
}

/// Close a connection by id.
///
/// Listeners and subscribers are only signalled: the self-pipe is tickled and
/// the thread blocked on the socket performs the final cleanup. Entries
/// without a self-pipe are torn down immediately. Returns `false` when the id
/// is unknown (already closed).
pub fn close(id: ConnectionId) -> bool {
    let mut table = table();
    let Some(block) = table.get(&id) else {
        return false;
    };

    if let Some(waker) = &block.waker {
        debug!(%id, kind = ?block.kind, "signalling close via self-pipe");
        waker.wake();
        return true;
    }

    if let Some(block) = table.remove(&id) {
        debug!(%id, kind = ?block.kind, "closing connection");
        if let Some(stream) = block.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
    true
}

/// Kind of a live connection, or `None` when it is not registered.
pub fn kind(id: ConnectionId) -> Option<ConnectionKind> {
    table().get(&id).map(|block| block.kind)
}

/// Number of registered connections.
pub fn live_connections() -> usize {
    table().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_without_waker_removes_entry() {
        let id = register(ConnectionKind::Client, None, None);
        assert_eq!(kind(id), Some(ConnectionKind::Client));
        assert!(close(id));
        assert_eq!(kind(id), None);
        assert!(!close(id));
    }

    #[test]
    fn close_with_waker_only_signals() {
        let waker = Arc::new(Waker::new().unwrap());
        let id = register(ConnectionKind::Listener, Some(Arc::clone(&waker)), None);

        assert!(close(id));
        assert!(waker.is_woken());
        assert_eq!(kind(id), Some(ConnectionKind::Listener));

        deregister(id);
        assert_eq!(kind(id), None);
    }

    #[test]
    fn ids_are_unique() {
        let a = register(ConnectionKind::Publisher, None, None);
        let b = register(ConnectionKind::Publisher, None, None);
        assert_ne!(a, b);
        deregister(a);
        deregister(b);
    }
}
