//! Event consumer: one reader thread, many adapters.
//!
//! The reader thread owns the subscriber socket. For every datagram it
//! parses the JSON, looks up the adapters registered for the embedded service
//! id plus the subscribe-all adapter, and hands the document to a worker pool
//! task. Adapters never run on the reader thread.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hubipc_pool::{PoolConfig, PoolStats, WorkerPool};
use hubipc_transport::{EventChannelConfig, Subscriber, TransportError, Waker};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::adapter::EventAdapter;
use crate::error::{EventError, Result};
use crate::event::{service_id_of, BaseEvent, SUBSCRIBE_ALL};

/// How long the reader waits for a datagram before re-checking for shutdown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Granularity of the wait for the reader thread to exit.
const EXIT_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub channel: EventChannelConfig,
    pub poll_interval: Duration,
    /// Sizing of the default pool created on first registration.
    pub pool: PoolConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            channel: EventChannelConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            pool: PoolConfig::new("hubipc-events", 1, 6, 128),
        }
    }
}

/// Outcome of [`Registry::insert`], kept so a failed start can undo it.
enum Insert {
    Added,
    Replaced(Arc<dyn EventAdapter>),
    Duplicate,
}

#[derive(Default)]
struct Registry {
    adapters: Vec<(u16, Arc<dyn EventAdapter>)>,
    subscribe_all: Option<Arc<dyn EventAdapter>>,
}

impl Registry {
    fn find(&self, service_id: u16) -> Option<Arc<dyn EventAdapter>> {
        self.adapters
            .iter()
            .find(|(id, _)| *id == service_id)
            .map(|(_, adapter)| Arc::clone(adapter))
    }

    fn insert(&mut self, service_id: u16, adapter: Arc<dyn EventAdapter>) -> Insert {
        if service_id == SUBSCRIBE_ALL {
            return match self.subscribe_all.replace(adapter) {
                Some(previous) => Insert::Replaced(previous),
                None => Insert::Added,
            };
        }
        if self.find(service_id).is_some() {
            return Insert::Duplicate;
        }
        self.adapters.push((service_id, adapter));
        Insert::Added
    }

    fn undo(&mut self, service_id: u16, insert: Insert) {
        match insert {
            Insert::Added => {
                self.remove(service_id);
            }
            Insert::Replaced(previous) => self.subscribe_all = Some(previous),
            Insert::Duplicate => {}
        }
    }

    fn remove(&mut self, service_id: u16) -> bool {
        if service_id == SUBSCRIBE_ALL {
            return self.subscribe_all.take().is_some();
        }
        let before = self.adapters.len();
        self.adapters.retain(|(id, _)| *id != service_id);
        self.adapters.len() != before
    }

    fn is_empty(&self) -> bool {
        self.adapters.is_empty() && self.subscribe_all.is_none()
    }

    fn len(&self) -> usize {
        self.adapters.len() + usize::from(self.subscribe_all.is_some())
    }
}

#[derive(Default)]
struct ReaderState {
    running: bool,
    waker: Option<Arc<Waker>>,
    handle: Option<JoinHandle<()>>,
}

struct ConsumerInner {
    config: ConsumerConfig,
    /// Serializes registration with reader start and removal with teardown.
    lifecycle: Mutex<()>,
    registry: Mutex<Registry>,
    default_pool: Mutex<Option<Arc<WorkerPool>>>,
    service_pools: Mutex<Option<HashMap<u16, Arc<WorkerPool>>>>,
    reader: Mutex<ReaderState>,
    reader_exited: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Demultiplexes broadcast events to registered adapters.
///
/// Most processes use the shared instance from [`EventConsumer::global`].
/// Dropping a consumer shuts it down.
pub struct EventConsumer {
    inner: Arc<ConsumerInner>,
}

impl EventConsumer {
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                config,
                lifecycle: Mutex::new(()),
                registry: Mutex::new(Registry::default()),
                default_pool: Mutex::new(None),
                service_pools: Mutex::new(None),
                reader: Mutex::new(ReaderState::default()),
                reader_exited: Condvar::new(),
            }),
        }
    }

    /// The process-wide consumer, listening on the default event channel.
    pub fn global() -> &'static EventConsumer {
        static GLOBAL: OnceLock<EventConsumer> = OnceLock::new();
        GLOBAL.get_or_init(|| EventConsumer::new(ConsumerConfig::default()))
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    /// Register `adapter` for events from `service_id`.
    ///
    /// Returns `Ok(false)` when another adapter already holds that id.
    /// [`SUBSCRIBE_ALL`] replaces any previous subscribe-all adapter instead.
    /// The first registration creates the default pool and starts the
    /// reader thread.
    pub fn start_listener(&self, service_id: u16, adapter: Arc<dyn EventAdapter>) -> Result<bool> {
        let _lifecycle = lock(&self.inner.lifecycle);
        let insert = lock(&self.inner.registry).insert(service_id, adapter);
        match insert {
            Insert::Duplicate => {
                warn!(service_id, "adapter already registered");
                return Ok(false);
            }
            Insert::Replaced(_) => debug!("subscribe-all adapter replaced"),
            Insert::Added => {}
        }

        if let Err(err) = self.inner.ensure_started() {
            lock(&self.inner.registry).undo(service_id, insert);
            return Err(err);
        }
        debug!(service_id, "event listener registered");
        Ok(true)
    }

    /// Remove the adapter for `service_id`. Removing the last adapter shuts
    /// the reader down. Returns whether an adapter was removed.
    pub fn stop_listener(&self, service_id: u16) -> bool {
        let lifecycle = lock(&self.inner.lifecycle);
        {
            let mut registry = lock(&self.inner.registry);
            if !registry.remove(service_id) {
                return false;
            }
            if !registry.is_empty() {
                return true;
            }
        }
        let pool = self.inner.stop_reader();
        drop(lifecycle);
        // Outside the lifecycle lock: a draining adapter may itself register.
        destroy_pool(pool);
        true
    }

    /// Stop the reader thread, destroy the default pool and drop every
    /// adapter. Used at process exit.
    pub fn shutdown_listener(&self) {
        let lifecycle = lock(&self.inner.lifecycle);
        let pool = self.inner.stop_reader();
        *lock(&self.inner.registry) = Registry::default();
        drop(lifecycle);
        destroy_pool(pool);
        debug!("event consumer shut down");
    }

    /// Route events from `service_id` to `pool` instead of the default pool.
    /// A pool already registered for that id is destroyed.
    pub fn register_service_pool(&self, service_id: u16, pool: WorkerPool) {
        let replaced = lock(&self.inner.service_pools)
            .get_or_insert_with(HashMap::new)
            .insert(service_id, Arc::new(pool));
        if let Some(old) = replaced {
            old.destroy();
        }
        debug!(service_id, "service pool registered");
    }

    /// Remove and destroy the pool for `service_id`. Returns whether one was
    /// registered.
    pub fn unregister_service_pool(&self, service_id: u16) -> bool {
        let removed = {
            let mut pools = lock(&self.inner.service_pools);
            let removed = pools.as_mut().and_then(|map| map.remove(&service_id));
            if pools.as_ref().is_some_and(HashMap::is_empty) {
                *pools = None;
            }
            removed
        };
        match removed {
            Some(pool) => {
                pool.destroy();
                true
            }
            None => false,
        }
    }

    /// Parse `json` and dispatch it as if it had arrived on the channel.
    ///
    /// Returns whether a task was queued for it.
    pub fn direct_inject(&self, json: &str) -> Result<bool> {
        let document: Value = serde_json::from_str(json)?;
        Ok(self.inner.dispatch(document))
    }

    /// Whether the reader thread is running.
    pub fn is_running(&self) -> bool {
        lock(&self.inner.reader).running
    }

    /// Registered adapters, counting the subscribe-all slot.
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.registry).len()
    }

    /// Counters of the default pool, if it exists.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        lock(&self.inner.default_pool).as_ref().map(|pool| pool.stats())
    }
}

impl Drop for EventConsumer {
    fn drop(&mut self) {
        self.shutdown_listener();
    }
}

fn destroy_pool(pool: Option<Arc<WorkerPool>>) {
    if let Some(pool) = pool {
        pool.destroy();
    }
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("channel", &self.inner.config.channel)
            .field("listeners", &self.listener_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ConsumerInner {
    fn ensure_started(self: &Arc<Self>) -> Result<()> {
        {
            let mut pool = lock(&self.default_pool);
            if pool.is_none() {
                *pool = Some(Arc::new(WorkerPool::new(self.config.pool.clone())?));
            }
        }

        let mut reader = lock(&self.reader);
        if reader.running {
            return Ok(());
        }

        let subscriber = Subscriber::register(&self.config.channel)?;
        let waker = subscriber.waker();
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("hubipc-event-reader".to_string())
            .spawn(move || reader_loop(&inner, subscriber))
            .map_err(EventError::Spawn)?;

        reader.running = true;
        reader.waker = Some(waker);
        // A previous reader that exited on its own has nothing left to join.
        reader.handle = Some(handle);
        Ok(())
    }

    /// Stop the current reader and detach the default pool for the caller
    /// to destroy. Callers hold the lifecycle lock, so no new reader can be
    /// started while this one is waited for.
    fn stop_reader(&self) -> Option<Arc<WorkerPool>> {
        let handle = {
            let mut reader = lock(&self.reader);
            if let Some(waker) = reader.waker.take() {
                waker.wake();
            }
            let handle = reader
                .handle
                .take()
                .filter(|handle| handle.thread().id() != thread::current().id());
            while reader.running && handle.as_ref().is_some_and(|h| !h.is_finished()) {
                reader = self
                    .reader_exited
                    .wait_timeout(reader, EXIT_WAIT_SLICE)
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0;
            }
            reader.running = false;
            handle
        };
        if handle.is_some_and(|handle| handle.join().is_err()) {
            warn!("event reader panicked");
        }
        lock(&self.default_pool).take()
    }

    fn pool_for(&self, service_id: Option<u16>) -> Option<Arc<WorkerPool>> {
        let dedicated = service_id.and_then(|id| {
            lock(&self.service_pools)
                .as_ref()
                .and_then(|pools| pools.get(&id).cloned())
        });
        dedicated.or_else(|| lock(&self.default_pool).clone())
    }

    /// Route one document to its adapters. Returns whether a task was queued.
    fn dispatch(&self, document: Value) -> bool {
        let service_id = service_id_of(&document);
        let (specific, all) = {
            let registry = lock(&self.registry);
            (
                service_id
                    .filter(|id| *id != SUBSCRIBE_ALL)
                    .and_then(|id| registry.find(id)),
                registry.subscribe_all.clone(),
            )
        };
        if specific.is_none() && all.is_none() {
            debug!(?service_id, "no adapter for event");
            return false;
        }

        let event = match BaseEvent::decode(&document) {
            Ok(event) => event,
            Err(err) => {
                warn!(?service_id, error = %err, "dropping event with bad header");
                return false;
            }
        };

        let Some(pool) = self.pool_for(service_id) else {
            warn!(?service_id, "no pool for event, consumer is stopped");
            return false;
        };

        let task = EventTask {
            event,
            document,
            adapters: [specific, all],
        };
        match pool.submit(move || task.run()) {
            Ok(()) => true,
            Err(err) => {
                warn!(?service_id, code = event.code, error = %err, "event dropped");
                false
            }
        }
    }
}

/// One event and the adapters it goes to, specific adapter first.
struct EventTask {
    event: BaseEvent,
    document: Value,
    adapters: [Option<Arc<dyn EventAdapter>>; 2],
}

impl EventTask {
    fn run(self) {
        for adapter in self.adapters.iter().flatten() {
            adapter.handle_event(&self.event, &self.document);
        }
    }
}

fn reader_loop(inner: &ConsumerInner, mut subscriber: Subscriber) {
    info!(channel = %inner.config.channel.group_addr(), "event reader started");
    loop {
        match subscriber.recv(Some(inner.config.poll_interval)) {
            Ok(datagram) => match serde_json::from_slice::<Value>(datagram) {
                Ok(document) => {
                    inner.dispatch(document);
                }
                Err(err) => {
                    warn!(len = datagram.len(), error = %err, "dropping malformed event");
                }
            },
            Err(TransportError::Timeout) => continue,
            Err(TransportError::Shutdown) => break,
            Err(TransportError::Io(err)) if err.raw_os_error() == Some(libc::EBADF) => break,
            Err(err) => {
                warn!(error = %err, "event receive failed");
            }
        }
    }

    drop(subscriber);
    let mut reader = lock(&inner.reader);
    reader.running = false;
    reader.waker = None;
    inner.reader_exited.notify_all();
    info!("event reader stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use serde_json::json;

    use super::*;

    fn consumer(port: u16) -> EventConsumer {
        EventConsumer::new(ConsumerConfig {
            channel: EventChannelConfig {
                port,
                ..EventChannelConfig::default()
            },
            poll_interval: Duration::from_millis(200),
            ..ConsumerConfig::default()
        })
    }

    type Seen = mpsc::Receiver<(&'static str, BaseEvent, Value)>;

    fn recording(tag: &'static str) -> (Arc<dyn EventAdapter>, Seen) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let adapter = move |event: &BaseEvent, json: &Value| {
            let _ = lock(&tx).send((tag, *event, json.clone()));
        };
        (Arc::new(adapter), rx)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn one_adapter_per_service_id() {
        let consumer = consumer(23441);
        let (first, first_rx) = recording("first");
        let (second, second_rx) = recording("second");

        assert!(consumer.start_listener(5, first).unwrap());
        assert!(!consumer.start_listener(5, second).unwrap());
        assert_eq!(consumer.listener_count(), 1);

        assert!(consumer.direct_inject(r#"{"_svcId":5,"_evCode":1}"#).unwrap());
        assert_eq!(first_rx.recv_timeout(WAIT).unwrap().0, "first");
        assert!(second_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn subscribe_all_is_replaced() {
        let consumer = consumer(23442);
        let (old, old_rx) = recording("old");
        let (new, new_rx) = recording("new");

        assert!(consumer.start_listener(SUBSCRIBE_ALL, old).unwrap());
        assert!(consumer.start_listener(SUBSCRIBE_ALL, new).unwrap());
        assert_eq!(consumer.listener_count(), 1);

        assert!(consumer.direct_inject(r#"{"_svcId":9}"#).unwrap());
        assert_eq!(new_rx.recv_timeout(WAIT).unwrap().0, "new");
        assert!(old_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn specific_then_subscribe_all_see_identical_arguments() {
        let consumer = consumer(23443);
        let (tx, rx) = mpsc::channel();
        let order = Arc::new(Mutex::new(tx));

        let specific_order = Arc::clone(&order);
        let specific = move |event: &BaseEvent, json: &Value| {
            let _ = lock(&specific_order).send(("specific", *event, json.clone()));
        };
        let all_order = Arc::clone(&order);
        let all = move |event: &BaseEvent, json: &Value| {
            let _ = lock(&all_order).send(("all", *event, json.clone()));
        };
        consumer.start_listener(5, Arc::new(specific)).unwrap();
        consumer.start_listener(SUBSCRIBE_ALL, Arc::new(all)).unwrap();

        let doc = r#"{"_svcId":5,"_evCode":21,"_evVal":3,"temp":19.5}"#;
        assert!(consumer.direct_inject(doc).unwrap());

        let (first_tag, first_event, first_json) = rx.recv_timeout(WAIT).unwrap();
        let (second_tag, second_event, second_json) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!((first_tag, second_tag), ("specific", "all"));
        assert_eq!(first_event, second_event);
        assert_eq!(first_event.code, 21);
        assert_eq!(first_event.value, 3);
        assert_eq!(first_json, second_json);
        assert_eq!(first_json["temp"], json!(19.5));
    }

    #[test]
    fn unmatched_and_malformed_events_are_dropped() {
        let consumer = consumer(23444);
        let (adapter, rx) = recording("only");
        consumer.start_listener(5, adapter).unwrap();

        assert!(!consumer.direct_inject(r#"{"_svcId":6}"#).unwrap());
        assert!(!consumer.direct_inject(r#"{"a":1}"#).unwrap());
        assert!(!consumer.direct_inject(r#"{"_svcId":5,"_evCode":"x"}"#).unwrap());
        assert!(matches!(
            consumer.direct_inject("{not json").unwrap_err(),
            EventError::Json(_)
        ));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn full_pool_drops_events_without_stopping() {
        let consumer = consumer(23445);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let (seen_tx, seen_rx) = mpsc::channel();
        let seen_tx = Mutex::new(seen_tx);
        let adapter = move |event: &BaseEvent, _: &Value| {
            if event.code == 1 {
                let _ = lock(&release_rx).recv();
            }
            let _ = lock(&seen_tx).send(event.code);
        };
        consumer.start_listener(5, Arc::new(adapter)).unwrap();
        consumer.register_service_pool(
            5,
            WorkerPool::new(PoolConfig::new("svc-5", 1, 1, 1)).unwrap(),
        );

        assert!(consumer.direct_inject(r#"{"_svcId":5,"_evCode":1}"#).unwrap());
        // Give the single worker time to pick up the blocking event.
        thread::sleep(Duration::from_millis(50));
        assert!(consumer.direct_inject(r#"{"_svcId":5,"_evCode":2}"#).unwrap());
        assert!(!consumer.direct_inject(r#"{"_svcId":5,"_evCode":3}"#).unwrap());
        assert!(consumer.is_running());

        release_tx.send(()).unwrap();
        assert_eq!(seen_rx.recv_timeout(WAIT).unwrap(), 1);
        assert_eq!(seen_rx.recv_timeout(WAIT).unwrap(), 2);

        assert!(consumer.direct_inject(r#"{"_svcId":5,"_evCode":4}"#).unwrap());
        assert_eq!(seen_rx.recv_timeout(WAIT).unwrap(), 4);
        assert!(consumer.unregister_service_pool(5));
        assert!(!consumer.unregister_service_pool(5));
    }

    #[test]
    fn last_stop_shuts_reader_down() {
        let consumer = consumer(23446);
        let (a, _a_rx) = recording("a");
        let (b, _b_rx) = recording("b");
        consumer.start_listener(1, a).unwrap();
        consumer.start_listener(SUBSCRIBE_ALL, b).unwrap();
        assert!(consumer.is_running());
        assert!(consumer.pool_stats().is_some());

        assert!(consumer.stop_listener(1));
        assert!(consumer.is_running());
        assert!(!consumer.stop_listener(1));

        assert!(consumer.stop_listener(SUBSCRIBE_ALL));
        assert!(!consumer.is_running());
        assert!(consumer.pool_stats().is_none());

        let (c, c_rx) = recording("c");
        assert!(consumer.start_listener(2, c).unwrap());
        assert!(consumer.is_running());
        assert!(consumer.direct_inject(r#"{"_svcId":2}"#).unwrap());
        assert_eq!(c_rx.recv_timeout(WAIT).unwrap().0, "c");
    }

    #[test]
    fn concurrent_start_and_stop_keep_new_listener() {
        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            let consumer = Arc::new(consumer(23449));
            for _ in 0..50 {
                let (a, _a_rx) = recording("a");
                consumer.start_listener(1, a).unwrap();

                let starter = Arc::clone(&consumer);
                let racing = thread::spawn(move || {
                    let (b, _b_rx) = recording("b");
                    starter.start_listener(2, b).unwrap()
                });
                assert!(consumer.stop_listener(1));
                assert!(racing.join().unwrap());

                assert_eq!(consumer.listener_count(), 1);
                assert!(consumer.is_running());
                assert!(consumer.direct_inject(r#"{"_svcId":2}"#).unwrap());
                assert!(consumer.stop_listener(2));
                assert!(!consumer.is_running());
            }
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(30))
            .expect("start/stop race should neither hang nor lose the new listener");
    }

    #[test]
    fn undo_restores_replaced_subscribe_all() {
        let mut registry = Registry::default();
        let (old, _old_rx) = recording("old");
        let (new, _new_rx) = recording("new");

        assert!(matches!(registry.insert(SUBSCRIBE_ALL, Arc::clone(&old)), Insert::Added));
        let insert = registry.insert(SUBSCRIBE_ALL, new);
        assert!(matches!(insert, Insert::Replaced(_)));
        registry.undo(SUBSCRIBE_ALL, insert);
        assert!(Arc::ptr_eq(registry.subscribe_all.as_ref().unwrap(), &old));

        let insert = registry.insert(4, Arc::clone(&old));
        assert!(matches!(registry.insert(4, Arc::clone(&old)), Insert::Duplicate));
        registry.undo(4, insert);
        assert!(registry.find(4).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn shutdown_listener_clears_everything() {
        let consumer = consumer(23447);
        let (a, _rx) = recording("a");
        consumer.start_listener(3, a).unwrap();

        consumer.shutdown_listener();
        assert!(!consumer.is_running());
        assert_eq!(consumer.listener_count(), 0);
        assert!(!consumer.direct_inject(r#"{"_svcId":3}"#).unwrap());
        consumer.shutdown_listener();
    }

    #[test]
    fn multicast_events_reach_adapter() {
        let consumer = consumer(23448);
        let (adapter, rx) = recording("mc");
        consumer.start_listener(7, adapter).unwrap();

        let producer = crate::EventProducer::init(7, &consumer.config().channel).unwrap();
        producer.broadcast(&mut json!({"a": 1})).unwrap();

        let (_, event, json) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(json["a"], json!(1));
        assert_eq!(json["_svcId"], json!(7));
        assert_eq!(event, BaseEvent::default());
    }
}
