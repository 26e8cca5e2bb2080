//! Client side of a request/response exchange.
//!
//! Every call opens a fresh connection, performs one exchange and closes it.
//! Nothing is retried; [`Sender::wait_for_available`] is the only polling
//! helper.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use hubipc_frame::{
    is_failure, recv_envelope, send_envelope, Envelope, DEFAULT_MAX_PAYLOAD, PING_RESPONSE,
};
use hubipc_transport::{
    wait_ready, Connection, Interest, Readiness, Waker, DEFAULT_CONNECT_TIMEOUT,
};
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};
use crate::resolver::{resolve_or_loopback, AddressResolver, LoopbackResolver};

/// Bound on writing a request, independent of the caller's read timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between liveness probes in [`Sender::wait_for_available`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sender configuration.
#[derive(Clone)]
pub struct SenderConfig {
    /// Bound on the connect call.
    pub connect_timeout: Duration,
    /// Bound on writing the request.
    pub write_timeout: Duration,
    /// Bound on reading a ping response, and the liveness poll period.
    pub poll_interval: Duration,
    /// Largest response payload accepted.
    pub max_payload_size: usize,
    /// Maps service ports to hosts.
    pub resolver: Arc<dyn AddressResolver>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            resolver: Arc::new(LoopbackResolver),
        }
    }
}

impl fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("max_payload_size", &self.max_payload_size)
            .finish_non_exhaustive()
    }
}

/// Issues requests to other services.
///
/// All connections opened by one sender watch the same outbound waker, so
/// [`shutdown`](Self::shutdown) cancels every exchange blocked on readiness
/// and makes later calls fail fast.
pub struct Sender {
    config: SenderConfig,
    waker: Arc<Waker>,
}

impl Sender {
    pub fn new(config: SenderConfig) -> Result<Self> {
        Ok(Self {
            config,
            waker: Arc::new(Waker::new()?),
        })
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Address a request for `port` is sent to.
    pub fn target(&self, port: u16) -> SocketAddr {
        SocketAddr::new(resolve_or_loopback(self.config.resolver.as_ref(), port), port)
    }

    fn open(&self, port: u16, request: &Envelope) -> Result<Connection> {
        let addr = self.target(port);
        let mut conn = Connection::connect_with_waker(
            addr,
            self.config.connect_timeout,
            Some(Arc::clone(&self.waker)),
        )?;
        send_envelope(&mut conn, request, Some(self.config.write_timeout))
            .map_err(ServiceError::Send)?;
        Ok(conn)
    }

    /// Send `request` to the service on `port` and read its response.
    ///
    /// `read_timeout` bounds the wait for the response; `None` waits until
    /// the peer answers or the sender is shut down. A response carrying a
    /// reserved failure code is returned as [`ServiceError::Remote`].
    pub fn send_request(
        &self,
        port: u16,
        request: &Envelope,
        read_timeout: Option<Duration>,
    ) -> Result<Envelope> {
        let mut conn = self.open(port, request)?;
        let response = recv_envelope(&mut conn, read_timeout, self.config.max_payload_size);
        drop(conn);

        let response = response.inspect_err(|err| {
            debug!(port, code = request.code, error = %err, "no response");
        })?;
        if is_failure(response.code) {
            debug!(port, code = response.code, "peer reported failure");
            return Err(ServiceError::Remote {
                code: response.code,
                payload: response.payload,
            });
        }
        Ok(response)
    }

    /// Send `request` without waiting for a response.
    pub fn send_only(&self, port: u16, request: &Envelope) -> Result<()> {
        self.open(port, request).map(drop)
    }

    /// Whether the service on `port` answers a ping.
    pub fn is_available(&self, port: u16) -> bool {
        match self.send_request(port, &Envelope::ping(), Some(self.config.poll_interval)) {
            Ok(response) => response.code == PING_RESPONSE,
            Err(err) => {
                debug!(port, error = %err, "service not available");
                false
            }
        }
    }

    /// Ping `port` once per poll interval until it answers.
    ///
    /// `None` or a zero timeout waits indefinitely (or until shutdown).
    /// Otherwise gives up once the attempts have covered `timeout`.
    pub fn wait_for_available(&self, port: u16, timeout: Option<Duration>) -> bool {
        let limit = timeout.filter(|t| !t.is_zero());
        let mut waited = Duration::ZERO;
        loop {
            if self.is_available(port) {
                return true;
            }
            if self.is_shut_down() {
                return false;
            }
            waited += self.config.poll_interval;
            if limit.is_some_and(|limit| waited > limit) {
                debug!(port, ?timeout, "gave up waiting for service");
                return false;
            }
            self.pause(self.config.poll_interval);
        }
    }

    // Sleep that ends early when the sender is shut down.
    fn pause(&self, period: Duration) {
        pause_with(period, || {
            wait_ready(self.waker.read_fd(), Interest::Readable, Some(period), None)
        });
    }

    /// Cancel blocked exchanges and refuse new ones. Idempotent.
    pub fn shutdown(&self) {
        if !self.waker.is_woken() {
            info!("sender shutting down");
        }
        self.waker.wake();
    }

    pub fn is_shut_down(&self) -> bool {
        self.waker.is_woken()
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// The process-wide sender used by the free functions in this module.
pub fn global() -> Result<&'static Sender> {
    static GLOBAL: OnceLock<Sender> = OnceLock::new();
    if let Some(sender) = GLOBAL.get() {
        return Ok(sender);
    }
    let sender = Sender::new(SenderConfig::default())?;
    Ok(GLOBAL.get_or_init(|| sender))
}

/// [`Sender::send_request`] on the process-wide sender.
pub fn send_request(
    port: u16,
    request: &Envelope,
    read_timeout: Option<Duration>,
) -> Result<Envelope> {
    global()?.send_request(port, request, read_timeout)
}

/// [`Sender::send_only`] on the process-wide sender.
pub fn send_only(port: u16, request: &Envelope) -> Result<()> {
    global()?.send_only(port, request)
}

/// [`Sender::is_available`] on the process-wide sender.
pub fn is_available(port: u16) -> bool {
    global().is_ok_and(|sender| sender.is_available(port))
}

/// [`Sender::wait_for_available`] on the process-wide sender.
pub fn wait_for_available(port: u16, timeout: Option<Duration>) -> bool {
    global().is_ok_and(|sender| sender.wait_for_available(port, timeout))
}

/// Shut down the process-wide sender. Used during process teardown.
pub fn shutdown() {
    if let Ok(sender) = global() {
        sender.shutdown();
    }
}

/// Run `wait`; if it fails, sleep out `period` so polling callers never spin.
fn pause_with(period: Duration, wait: impl FnOnce() -> std::io::Result<Readiness>) {
    if let Err(err) = wait() {
        warn!(error = %err, "pause wait failed, sleeping instead");
        thread::sleep(period);
    }
}
