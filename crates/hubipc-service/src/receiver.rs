//! Server side: one listening port, one accept thread, one worker pool.
//!
//! Shutdown is a state machine guarded by a mutex and condvar:
//! `Running -> ShuttingDown -> Dead`. The accept thread owns the listening
//! socket and is the only thread that moves the receiver to `Dead`; the
//! worker pool is torn down only after that, so no task can be dispatched
//! into a destroyed pool. Threads waiting for `Dead` are counted, and the
//! shutting-down thread does not finish until every one of them has left.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hubipc_frame::{
    accept_envelope, send_envelope, Envelope, FrameConfig, FrameError, DEFAULT_MAX_PAYLOAD,
    SUCCESS,
};
use hubipc_pool::{PoolConfig, PoolStats, WorkerPool};
use hubipc_transport::{Connection, Listener, ListenerCloser};
use tracing::{debug, info, warn};

use crate::control::{control_response, HandlerStatus, RequestHandler};
use crate::error::{Result, ServiceError};

/// Granularity of the incremental condvar waits during shutdown.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Request read bound used when the configured one is zero.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a [`Receiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Accepting requests.
    Running,
    /// Shutdown requested; the accept thread has not exited yet.
    ShuttingDown,
    /// The accept thread has exited and the listening socket is gone.
    Dead,
}

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Interface the listening socket binds to.
    pub host: Ipv4Addr,
    /// Bound on each accept wait. The accept loop re-checks state between waits.
    pub accept_timeout: Duration,
    /// Bound on reading a request once a connection is accepted. Requests
    /// are read on the accept thread, so this is always finite; zero means
    /// [`DEFAULT_READ_TIMEOUT`].
    pub read_timeout: Duration,
    /// Bound on writing each response.
    pub response_timeout: Duration,
    /// Largest request payload accepted.
    pub max_payload_size: usize,
    pub min_threads: usize,
    pub max_threads: usize,
    pub max_queue: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            accept_timeout: Duration::from_secs(60),
            read_timeout: DEFAULT_READ_TIMEOUT,
            response_timeout: Duration::from_secs(5),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            min_threads: 1,
            max_threads: 5,
            max_queue: 64,
        }
    }
}

type ShutdownCallback = Box<dyn FnOnce() + Send>;

struct Control {
    state: ReceiverState,
    waiters: usize,
}

struct ReceiverInner {
    name: String,
    port: u16,
    config: ReceiverConfig,
    handler: Box<dyn RequestHandler>,
    control: Mutex<Control>,
    changed: Condvar,
    closer: ListenerCloser,
    pool: WorkerPool,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    on_shutdown: Mutex<Option<ShutdownCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A running request handler bound to one port.
///
/// Cloning yields another handle to the same receiver. The receiver keeps
/// running until [`shutdown`](Self::shutdown) is called, either by a holder
/// of a handle or by the handler returning [`HandlerStatus::Shutdown`].
#[derive(Clone)]
pub struct Receiver {
    inner: Arc<ReceiverInner>,
}

impl Receiver {
    /// Listen on `port`, start the worker pool and the accept thread.
    ///
    /// Port 0 binds an ephemeral port; see [`port`](Self::port).
    pub fn start(
        name: &str,
        port: u16,
        handler: impl RequestHandler,
        config: ReceiverConfig,
    ) -> Result<Self> {
        let listener = Listener::establish(config.host, port)?;
        let port = listener.local_port();
        let pool = WorkerPool::new(PoolConfig::new(
            format!("{name}-worker"),
            config.min_threads,
            config.max_threads,
            config.max_queue,
        ))?;

        let inner = Arc::new(ReceiverInner {
            name: name.to_string(),
            port,
            config,
            handler: Box::new(handler),
            control: Mutex::new(Control {
                state: ReceiverState::Running,
                waiters: 0,
            }),
            changed: Condvar::new(),
            closer: listener.closer(),
            pool,
            accept_thread: Mutex::new(None),
            on_shutdown: Mutex::new(None),
        });

        let accept_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(format!("{name}-accept"))
            .spawn(move || accept_loop(&accept_inner, listener))
            .map_err(ServiceError::Spawn)?;
        *lock(&inner.accept_thread) = Some(handle);

        info!(receiver = %inner.name, port, "receiver started");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn state(&self) -> ReceiverState {
        lock(&self.inner.control).state
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Run `callback` once shutdown has completed.
    pub fn on_shutdown(&self, callback: impl FnOnce() + Send + 'static) {
        *lock(&self.inner.on_shutdown) = Some(Box::new(callback));
    }

    /// Stop accepting, drain in-flight requests and release the receiver.
    ///
    /// Returns `false` when the receiver was not running, which makes a
    /// second call a no-op.
    pub fn shutdown(&self) -> bool {
        self.inner.shutdown()
    }

    /// Block until the accept thread has exited. Returns at once when it
    /// already has.
    pub fn wait_for_shutdown(&self) {
        self.inner.wait_dead();
    }

    /// Like [`wait_for_shutdown`](Self::wait_for_shutdown) with a bound.
    /// Returns whether the receiver is dead.
    pub fn wait_for_shutdown_timeout(&self, timeout: Duration) -> bool {
        let inner = &self.inner;
        let mut control = lock(&inner.control);
        control.waiters += 1;
        let (mut control, _) = inner
            .changed
            .wait_timeout_while(control, timeout, |c| c.state != ReceiverState::Dead)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        control.waiters -= 1;
        inner.changed.notify_all();
        control.state == ReceiverState::Dead
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("name", &self.inner.name)
            .field("port", &self.inner.port)
            .field("state", &self.state())
            .finish()
    }
}

impl ReceiverInner {
    fn is_running(&self) -> bool {
        lock(&self.control).state == ReceiverState::Running
    }

    fn shutdown(&self) -> bool {
        {
            let mut control = lock(&self.control);
            if control.state != ReceiverState::Running {
                return false;
            }
            control.state = ReceiverState::ShuttingDown;
        }
        info!(receiver = %self.name, port = self.port, "receiver shutting down");

        // Two-phase close: the accept thread drops the socket once it wakes.
        self.closer.close();
        self.wait_dead();

        self.pool.destroy();

        {
            let mut control = lock(&self.control);
            while control.waiters > 0 {
                self.changed.notify_all();
                control = self
                    .changed
                    .wait_timeout(control, WAIT_SLICE)
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0;
            }
        }

        let accept_thread = lock(&self.accept_thread).take();
        if let Some(handle) = accept_thread {
            if handle.join().is_err() {
                warn!(receiver = %self.name, "accept thread panicked");
            }
        }

        let callback = lock(&self.on_shutdown).take();
        if let Some(callback) = callback {
            callback();
        }

        info!(receiver = %self.name, port = self.port, "receiver stopped");
        true
    }

    fn wait_dead(&self) {
        let mut control = lock(&self.control);
        control.waiters += 1;
        while control.state != ReceiverState::Dead {
            control = self
                .changed
                .wait_timeout(control, WAIT_SLICE)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        control.waiters -= 1;
        self.changed.notify_all();
    }

    fn mark_dead(&self) {
        let mut control = lock(&self.control);
        control.state = ReceiverState::Dead;
        self.changed.notify_all();
    }

    fn dispatch(self: &Arc<Self>, request: Envelope, conn: Connection) {
        let task = RequestTask {
            request,
            conn: Some(conn),
        };
        let inner = Arc::clone(self);
        if let Err(err) = self.pool.submit(move || inner.serve(task)) {
            // The rejected task aborted its connection when it was dropped.
            warn!(receiver = %self.name, error = %err, "request dropped");
        }
    }

    fn serve(self: &Arc<Self>, mut task: RequestTask) {
        let Some(mut conn) = task.conn.take() else {
            return;
        };

        let (response, status) = match control_response(&task.request) {
            Some(response) => (response, HandlerStatus::Done),
            None => {
                let mut response = Envelope::empty(SUCCESS);
                let status = self.handler.handle_request(&task.request, &mut response);
                if status == HandlerStatus::Shutdown {
                    response.code = SUCCESS;
                }
                (response, status)
            }
        };

        if let Err(err) = send_envelope(&mut conn, &response, Some(self.config.response_timeout)) {
            warn!(
                receiver = %self.name,
                id = %conn.id(),
                code = task.request.code,
                error = %err,
                "failed to send response"
            );
        }
        drop(conn);

        if status == HandlerStatus::Shutdown {
            info!(receiver = %self.name, code = task.request.code, "handler requested shutdown");
            self.shutdown();
        }
    }
}

/// An accepted request waiting for a worker.
///
/// Dropping an unserved task aborts its connection, so a request rejected by
/// the pool never leaves the client waiting for a response.
struct RequestTask {
    request: Envelope,
    conn: Option<Connection>,
}

impl Drop for RequestTask {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.abort();
        }
    }
}

fn request_read_timeout(config: &ReceiverConfig) -> Duration {
    if config.read_timeout.is_zero() {
        DEFAULT_READ_TIMEOUT
    } else {
        config.read_timeout
    }
}

fn accept_loop(inner: &Arc<ReceiverInner>, listener: Listener) {
    debug!(receiver = %inner.name, port = inner.port, "accept loop running");
    let frame_config = FrameConfig {
        max_payload_size: inner.config.max_payload_size,
        read_timeout: Some(request_read_timeout(&inner.config)),
        write_timeout: Some(inner.config.response_timeout),
    };

    while inner.is_running() && !listener.is_closed() {
        match accept_envelope(&listener, Some(inner.config.accept_timeout), &frame_config) {
            Ok((request, conn)) => {
                debug!(receiver = %inner.name, id = %conn.id(), code = request.code, "request accepted");
                inner.dispatch(request, conn);
            }
            Err(FrameError::Timeout) => continue,
            Err(FrameError::ServiceDisabled) => {
                let mut control = lock(&inner.control);
                if control.state == ReceiverState::Running {
                    control.state = ReceiverState::ShuttingDown;
                }
                break;
            }
            Err(err) => {
                warn!(receiver = %inner.name, error = %err, "failed to receive request");
            }
        }
    }

    drop(listener);
    inner.mark_dead();
    debug!(receiver = %inner.name, "accept loop exited");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use hubipc_frame::{PING_REQUEST, PING_RESPONSE};

    use super::*;
    use crate::sender::{Sender, SenderConfig};

    fn echo(request: &Envelope, response: &mut Envelope) -> HandlerStatus {
        response.payload = request.payload.clone();
        HandlerStatus::Done
    }

    fn sender() -> Sender {
        Sender::new(SenderConfig::default()).expect("sender should build")
    }

    const READ: Option<Duration> = Some(Duration::from_secs(5));

    fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
        let start = std::time::Instant::now();
        while !done() {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn serves_requests_until_shutdown() {
        let receiver = Receiver::start("echo", 0, echo, ReceiverConfig::default())
            .expect("receiver should start");
        assert_eq!(receiver.state(), ReceiverState::Running);

        let response = sender()
            .send_request(receiver.port(), &Envelope::new(42, "hi"), READ)
            .expect("request should succeed");
        assert_eq!(response.code, SUCCESS);
        assert_eq!(response.payload.as_ref(), b"hi");

        assert!(receiver.shutdown());
        assert_eq!(receiver.state(), ReceiverState::Dead);
    }

    #[test]
    fn ping_bypasses_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let handler = move |_: &Envelope, _: &mut Envelope| {
            counted.fetch_add(1, Ordering::SeqCst);
            HandlerStatus::Done
        };
        let receiver = Receiver::start("ping", 0, handler, ReceiverConfig::default()).unwrap();

        let response = sender()
            .send_request(receiver.port(), &Envelope::empty(PING_REQUEST), READ)
            .unwrap();
        assert_eq!(response.code, PING_RESPONSE);
        assert!(response.payload.is_empty());
        assert!(sender().is_available(receiver.port()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        receiver.shutdown();
    }

    #[test]
    fn second_shutdown_is_a_no_op() {
        let receiver = Receiver::start("twice", 0, echo, ReceiverConfig::default()).unwrap();
        assert!(receiver.shutdown());
        assert!(!receiver.shutdown());
        receiver.wait_for_shutdown();
        assert_eq!(receiver.state(), ReceiverState::Dead);
    }

    #[test]
    fn no_connections_accepted_after_shutdown() {
        let receiver = Receiver::start("closed", 0, echo, ReceiverConfig::default()).unwrap();
        let port = receiver.port();
        receiver.shutdown();

        assert!(!sender().is_available(port));
        let err = sender()
            .send_request(port, &Envelope::empty(42), READ)
            .unwrap_err();
        assert_eq!(err.status_code(), hubipc_frame::CONNECT_ERROR);
    }

    #[test]
    fn waiters_are_released_by_shutdown() {
        let receiver = Receiver::start("waiters", 0, echo, ReceiverConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let receiver = receiver.clone();
                let tx = tx.clone();
                thread::spawn(move || {
                    receiver.wait_for_shutdown();
                    tx.send(receiver.state()).unwrap();
                })
            })
            .collect();

        assert!(!receiver.wait_for_shutdown_timeout(Duration::from_millis(20)));
        receiver.shutdown();

        for _ in 0..3 {
            let state = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(state, ReceiverState::Dead);
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn handler_can_shut_receiver_down() {
        let handler = |request: &Envelope, response: &mut Envelope| {
            response.code = 77;
            if request.code == 1000 {
                HandlerStatus::Shutdown
            } else {
                HandlerStatus::Done
            }
        };
        let receiver = Receiver::start("self-stop", 0, handler, ReceiverConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel();
        receiver.on_shutdown(move || tx.send(()).unwrap());

        let response = sender()
            .send_request(receiver.port(), &Envelope::empty(1000), READ)
            .unwrap();
        assert_eq!(response.code, SUCCESS);

        rx.recv_timeout(Duration::from_secs(5))
            .expect("shutdown callback should run");
        assert_eq!(receiver.state(), ReceiverState::Dead);
        assert!(!receiver.shutdown());
    }

    #[test]
    fn in_flight_requests_finish_before_shutdown_returns() {
        let completed = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&completed);
        let (started_tx, started_rx) = mpsc::channel();
        let started_tx = Mutex::new(started_tx);
        let handler = move |_: &Envelope, _: &mut Envelope| {
            let _ = lock(&started_tx).send(());
            thread::sleep(Duration::from_millis(100));
            done.fetch_add(1, Ordering::SeqCst);
            HandlerStatus::Done
        };
        let receiver = Receiver::start("drain", 0, handler, ReceiverConfig::default()).unwrap();
        let port = receiver.port();

        let client = thread::spawn(move || {
            sender().send_request(port, &Envelope::empty(42), READ)
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        receiver.shutdown();
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert!(client.join().unwrap().is_ok());
    }

    #[test]
    fn pool_stats_reflect_config() {
        let config = ReceiverConfig {
            min_threads: 2,
            max_threads: 3,
            max_queue: 7,
            ..ReceiverConfig::default()
        };
        let receiver = Receiver::start("stats", 0, echo, config).unwrap();
        let stats = receiver.pool_stats();
        assert_eq!(stats.threads, 2);
        assert_eq!(stats.max_queue, 7);
        receiver.shutdown();
        assert_eq!(receiver.pool_stats().threads, 0);
    }

    #[test]
    fn request_beyond_pool_capacity_is_aborted() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let handler = move |request: &Envelope, response: &mut Envelope| {
            if request.code == 1 {
                let _ = lock(&gate_rx).recv();
            }
            response.payload = request.payload.clone();
            HandlerStatus::Done
        };
        let config = ReceiverConfig {
            min_threads: 1,
            max_threads: 1,
            max_queue: 1,
            ..ReceiverConfig::default()
        };
        let receiver = Receiver::start("full", 0, handler, config).unwrap();
        let port = receiver.port();
        let request = |code: i32| {
            thread::spawn(move || sender().send_request(port, &Envelope::new(code, "x"), READ))
        };

        let blocked = request(1);
        wait_until("blocking request", || receiver.pool_stats().active == 1);
        let queued = request(2);
        wait_until("queued request", || receiver.pool_stats().queued == 1);

        let err = sender()
            .send_request(port, &Envelope::new(3, "x"), READ)
            .unwrap_err();
        assert_eq!(err.status_code(), hubipc_frame::READ_ERROR);
        assert_eq!(receiver.pool_stats().rejected, 1);

        drop(gate_tx);
        assert!(blocked.join().unwrap().is_ok());
        assert!(queued.join().unwrap().is_ok());
        receiver.shutdown();
    }

    #[test]
    fn silent_client_does_not_stall_accept_loop() {
        let config = ReceiverConfig {
            read_timeout: Duration::from_millis(200),
            ..ReceiverConfig::default()
        };
        let receiver = Receiver::start("silent", 0, echo, config).unwrap();
        let _silent = std::net::TcpStream::connect((Ipv4Addr::LOCALHOST, receiver.port())).unwrap();

        let response = sender()
            .send_request(receiver.port(), &Envelope::new(42, "after"), READ)
            .expect("request behind a silent client should be served");
        assert_eq!(response.payload.as_ref(), b"after");

        let (done_tx, done_rx) = mpsc::channel();
        let stopping = receiver.clone();
        thread::spawn(move || {
            stopping.shutdown();
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("shutdown should not wait on a silent client");
    }

    #[test]
    fn zero_read_timeout_falls_back_to_default() {
        let config = ReceiverConfig {
            read_timeout: Duration::ZERO,
            ..ReceiverConfig::default()
        };
        assert_eq!(request_read_timeout(&config), DEFAULT_READ_TIMEOUT);
        assert_eq!(
            request_read_timeout(&ReceiverConfig::default()),
            DEFAULT_READ_TIMEOUT
        );
    }
}
