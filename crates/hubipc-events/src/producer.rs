use std::sync::{Arc, Mutex, MutexGuard};

use hubipc_transport::{EventChannelConfig, Publisher};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{EventError, Result};
use crate::event::{BaseEvent, SERVICE_ID_KEY};

/// Broadcasts JSON events stamped with one service id.
///
/// Delivery is fire-and-forget: a successful broadcast only means the
/// datagram left this process.
pub struct EventProducer {
    service_id: u16,
    publisher: Mutex<Option<Arc<Publisher>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventProducer {
    /// Open the publish side of the event channel.
    pub fn init(service_id: u16, config: &EventChannelConfig) -> Result<Self> {
        let publisher = Publisher::register(config)?;
        info!(service_id, group = %config.group_addr(), "event producer ready");
        Ok(Self {
            service_id,
            publisher: Mutex::new(Some(Arc::new(publisher))),
        })
    }

    pub fn service_id(&self) -> u16 {
        self.service_id
    }

    /// Stamp `json` with this producer's service id and send it.
    ///
    /// An existing service id field is overwritten. The document must be an
    /// object.
    pub fn broadcast(&self, json: &mut Value) -> Result<()> {
        let map = json.as_object_mut().ok_or(EventError::NotAnObject)?;
        map.insert(SERVICE_ID_KEY.to_string(), Value::from(self.service_id));
        let datagram = serde_json::to_vec(json)?;

        let publisher = lock(&self.publisher)
            .as_ref()
            .map(Arc::clone)
            .ok_or(EventError::ShutDown)?;
        publisher.publish(&datagram)?;
        debug!(service_id = self.service_id, len = datagram.len(), "event broadcast");
        Ok(())
    }

    /// Broadcast a base event header merged over `extra`.
    ///
    /// `extra` must be an object or null. Header fields win over same-named
    /// fields in `extra`. Returns the header as sent, with its id and
    /// timestamp filled in.
    pub fn broadcast_event(&self, event: &BaseEvent, extra: Value) -> Result<BaseEvent> {
        let mut map = match extra {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(EventError::NotAnObject),
        };
        let event = event.stamped();
        event.write_into(&mut map);
        self.broadcast(&mut Value::Object(map))?;
        Ok(event)
    }

    /// Close the channel. Returns `false` if it was already closed.
    pub fn shutdown(&self) -> bool {
        let closed = lock(&self.publisher).take().is_some();
        if closed {
            info!(service_id = self.service_id, "event producer closed");
        }
        closed
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.publisher).is_none()
    }
}

impl std::fmt::Debug for EventProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProducer")
            .field("service_id", &self.service_id)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
