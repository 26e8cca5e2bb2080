use std::io::{Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::poll::{wait_ready, Interest, Readiness};
use crate::sys;
use crate::table::{self, ConnectionId, ConnectionKind};
use crate::waker::Waker;

/// Listen backlog used by [`Listener::establish`].
pub const LISTEN_BACKLOG: libc::c_int = 50;

/// Default bound on [`Connection::connect`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected stream socket: either an outbound client or an accepted peer.
///
/// Implements `Read + Write`. Dropping the connection closes the socket and
/// removes it from the connection table.
pub struct Connection {
    id: ConnectionId,
    kind: ConnectionKind,
    stream: TcpStream,
    waker: Option<Arc<Waker>>,
}

impl Connection {
    /// Connect to `addr` (blocking, bounded by `timeout`).
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        Self::connect_with_waker(addr, timeout, None)
    }

    /// Connect and watch `waker` in every later readiness wait, so a blocked
    /// exchange can be cancelled from another thread.
    pub fn connect_with_waker(
        addr: SocketAddr,
        timeout: Duration,
        waker: Option<Arc<Waker>>,
    ) -> Result<Self> {
        if waker.as_deref().is_some_and(Waker::is_woken) {
            return Err(TransportError::Shutdown);
        }

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|source| {
            debug!(%addr, error = %source, "connect failed");
            TransportError::Connect { addr, source }
        })?;
        stream.set_nodelay(true)?;

        let id = table::register(ConnectionKind::Client, None, stream.try_clone().ok());
        debug!(%id, %addr, "connected");

        Ok(Self {
            id,
            kind: ConnectionKind::Client,
            stream,
            waker,
        })
    }

    fn from_accepted(stream: TcpStream, peer: SocketAddr) -> Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let id = table::register(ConnectionKind::Accepted, None, stream.try_clone().ok());
        debug!(%id, %peer, "accepted connection");
        Ok(Self {
            id,
            kind: ConnectionKind::Accepted,
            stream,
            waker: None,
        })
    }

    /// Connection table id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether this is an outbound or accepted connection.
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr().map_err(Into::into)
    }

    /// Wait until the socket is ready for `interest`.
    pub fn wait(&self, interest: Interest, timeout: Option<Duration>) -> Result<Readiness> {
        wait_ready(
            self.stream.as_raw_fd(),
            interest,
            timeout,
            self.waker.as_deref(),
        )
        .map_err(Into::into)
    }

    /// Set the per-call read timeout. A zero duration clears it.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream
            .set_read_timeout(timeout.filter(|t| !t.is_zero()))
            .map_err(Into::into)
    }

    /// Set the per-call write timeout. A zero duration clears it.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream
            .set_write_timeout(timeout.filter(|t| !t.is_zero()))
            .map_err(Into::into)
    }

    /// Forcibly shut down and close this connection.
    ///
    /// Used when an accepted request cannot be answered.
    pub fn abort(self) {
        debug!(id = %self.id, "aborting connection");
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        table::deregister(self.id);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Listening stream socket with a self-pipe for interruptible accepts.
///
/// The listener itself is owned by the thread that accepts on it; other
/// threads close it through a [`ListenerCloser`], which only tickles the
/// self-pipe. The accepting thread sees [`TransportError::Shutdown`] and drops
/// the listener, releasing the socket.
pub struct Listener {
    id: ConnectionId,
    listener: TcpListener,
    waker: Arc<Waker>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind and listen on `host:port` with address (and port) reuse enabled.
    ///
    /// Port 0 binds an ephemeral port; see [`local_port`](Self::local_port).
    pub fn establish(host: Ipv4Addr, port: u16) -> Result<Self> {
        let requested = SocketAddrV4::new(host, port);
        let bind_err = |source| TransportError::Bind {
            addr: SocketAddr::V4(requested),
            source,
        };

        let fd = sys::socket_v4(libc::SOCK_STREAM).map_err(bind_err)?;
        sys::set_reuse(fd.as_raw_fd()).map_err(bind_err)?;
        sys::bind_v4(fd.as_raw_fd(), requested).map_err(bind_err)?;
        sys::listen(fd.as_raw_fd(), LISTEN_BACKLOG).map_err(bind_err)?;

        let listener = TcpListener::from(fd);
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let waker = Arc::new(Waker::new()?);
        let id = table::register(ConnectionKind::Listener, Some(Arc::clone(&waker)), None);
        info!(%id, addr = %local_addr, "listening");

        Ok(Self {
            id,
            listener,
            waker,
            local_addr,
        })
    }

    /// Connection table id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port (useful after binding port 0).
    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Handle other threads use to request the listener be closed.
    pub fn closer(&self) -> ListenerCloser {
        ListenerCloser {
            id: self.id,
            waker: Arc::clone(&self.waker),
        }
    }

    /// Whether a close has been requested.
    pub fn is_closed(&self) -> bool {
        self.waker.is_woken()
    }

    /// Accept the next connection, waiting at most `timeout`.
    ///
    /// Returns [`TransportError::Timeout`] when nothing arrived and
    /// [`TransportError::Shutdown`] when the listener was closed.
    pub fn accept(&self, timeout: Option<Duration>) -> Result<Connection> {
        match wait_ready(
            self.listener.as_raw_fd(),
            Interest::Readable,
            timeout,
            Some(&self.waker),
        )? {
            Readiness::Ready => {}
            Readiness::TimedOut => return Err(TransportError::Timeout),
            Readiness::Woken => return Err(TransportError::Shutdown),
        }

        match self.listener.accept() {
            Ok((stream, peer)) => Connection::from_accepted(stream, peer),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                Err(TransportError::Timeout)
            }
            Err(err) if err.raw_os_error() == Some(libc::EBADF) => Err(TransportError::Shutdown),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        table::deregister(self.id);
        debug!(id = %self.id, addr = %self.local_addr, "listener closed");
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Cloneable close handle for a [`Listener`].
#[derive(Debug, Clone)]
pub struct ListenerCloser {
    id: ConnectionId,
    waker: Arc<Waker>,
}

impl ListenerCloser {
    /// Id of the listener this handle closes.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Signal the accepting thread to stop. Idempotent.
    pub fn close(&self) {
        self.waker.wake();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.waker.is_woken()
    }
}
