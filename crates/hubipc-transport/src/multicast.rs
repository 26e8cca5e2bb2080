use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::poll::{wait_ready, Interest, Readiness};
use crate::sys;
use crate::table::{self, ConnectionId, ConnectionKind};
use crate::waker::Waker;

/// Default multicast group for the event channel.
pub const DEFAULT_EVENT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 77, 77);

/// Default UDP port for the event channel.
pub const DEFAULT_EVENT_PORT: u16 = 13400;

/// Default receive buffer: one maximum-size datagram.
pub const DEFAULT_RECV_BUFFER: usize = 64 * 1024;

/// Addressing for the broadcast event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventChannelConfig {
    /// Multicast group datagrams are sent to.
    pub group: Ipv4Addr,
    /// UDP port shared by publishers and subscribers.
    pub port: u16,
    /// Local interface the group is joined on. Loopback keeps traffic on-host.
    pub interface: Ipv4Addr,
    /// Multicast TTL for published datagrams.
    pub ttl: u32,
    /// Largest datagram a subscriber can receive.
    pub recv_buffer: usize,
}

impl Default for EventChannelConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_EVENT_GROUP,
            port: DEFAULT_EVENT_PORT,
            interface: Ipv4Addr::LOCALHOST,
            ttl: 1,
            recv_buffer: DEFAULT_RECV_BUFFER,
        }
    }
}

impl EventChannelConfig {
    /// Group address and port as a socket address.
    pub fn group_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.group, self.port)
    }

    fn multicast_err(&self) -> impl Fn(std::io::Error) -> TransportError + '_ {
        move |source| TransportError::Multicast {
            group: SocketAddr::V4(self.group_addr()),
            source,
        }
    }
}

/// Publish side of the event channel.
pub struct Publisher {
    id: ConnectionId,
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl Publisher {
    /// Open a datagram socket that sends to the configured group over the
    /// loopback interface.
    pub fn register(config: &EventChannelConfig) -> Result<Self> {
        let err = config.multicast_err();
        let socket =
            UdpSocket::bind(SocketAddrV4::new(config.interface, 0)).map_err(&err)?;
        socket.set_multicast_loop_v4(true).map_err(&err)?;
        socket.set_multicast_ttl_v4(config.ttl).map_err(&err)?;
        sys::set_multicast_if(socket.as_raw_fd(), config.interface).map_err(&err)?;

        let id = table::register(ConnectionKind::Publisher, None, None);
        debug!(%id, group = %config.group_addr(), "publisher registered");

        Ok(Self {
            id,
            socket,
            target: config.group_addr(),
        })
    }

    /// Connection table id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send one datagram to the group. No acknowledgement.
    pub fn publish(&self, payload: &[u8]) -> Result<usize> {
        self.socket.send_to(payload, self.target).map_err(Into::into)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        table::deregister(self.id);
        debug!(id = %self.id, "publisher closed");
    }
}

/// Subscribe side of the event channel, with a self-pipe for shutdown.
pub struct Subscriber {
    id: ConnectionId,
    socket: UdpSocket,
    waker: Arc<Waker>,
    buf: Vec<u8>,
}

impl Subscriber {
    /// Bind the group port (with reuse, so several processes can listen) and
    /// join the group on the configured interface.
    pub fn register(config: &EventChannelConfig) -> Result<Self> {
        let err = config.multicast_err();

        let fd = sys::socket_v4(libc::SOCK_DGRAM).map_err(&err)?;
        sys::set_reuse(fd.as_raw_fd()).map_err(&err)?;
        sys::bind_v4(fd.as_raw_fd(), config.group_addr()).map_err(&err)?;

        let socket = UdpSocket::from(fd);
        socket
            .join_multicast_v4(&config.group, &config.interface)
            .map_err(&err)?;
        socket.set_nonblocking(true).map_err(&err)?;

        let waker = Arc::new(Waker::new()?);
        let id = table::register(ConnectionKind::Subscriber, Some(Arc::clone(&waker)), None);
        info!(%id, group = %config.group_addr(), "subscribed to event channel");

        Ok(Self {
            id,
            socket,
            waker,
            buf: vec![0u8; config.recv_buffer.max(1)],
        })
    }

    /// Connection table id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Shared waker; [`Waker::wake`] makes a blocked [`recv`](Self::recv)
    /// return [`TransportError::Shutdown`].
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Receive one datagram, waiting at most `timeout`.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<&[u8]> {
        match wait_ready(
            self.socket.as_raw_fd(),
            Interest::Readable,
            timeout,
            Some(&self.waker),
        )? {
            Readiness::Ready => {}
            Readiness::TimedOut => return Err(TransportError::Timeout),
            Readiness::Woken => return Err(TransportError::Shutdown),
        }

        match self.socket.recv_from(&mut self.buf) {
            Ok((len, _from)) => Ok(&self.buf[..len]),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                Err(TransportError::Timeout)
            }
            Err(err) => Err(TransportError::Io(err)),
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        table::deregister(self.id);
        debug!(id = %self.id, "subscriber closed");
    }
}
