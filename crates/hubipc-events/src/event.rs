//! Well-known event fields.
//!
//! Every event is a JSON object. The producer stamps the originating service
//! id under [`SERVICE_ID_KEY`]; events sent through
//! [`EventProducer::broadcast_event`](crate::EventProducer::broadcast_event)
//! also carry the base header fields.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EventError, Result};

/// Key holding the originating service id.
pub const SERVICE_ID_KEY: &str = "_svcId";
pub const EVENT_ID_KEY: &str = "_evId";
pub const EVENT_CODE_KEY: &str = "_evCode";
pub const EVENT_VALUE_KEY: &str = "_evVal";
pub const EVENT_TIME_KEY: &str = "_evTime";

/// Service id that subscribes to every event.
pub const SUBSCRIBE_ALL: u16 = 0;

/// Fixed header decoded from every dispatched event.
///
/// Missing fields decode as zero; a field of the wrong type fails the decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEvent {
    #[serde(rename = "_evId", default)]
    pub id: u64,
    #[serde(rename = "_evCode", default)]
    pub code: i32,
    #[serde(rename = "_evVal", default)]
    pub value: i32,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "_evTime", default)]
    pub time: u64,
}

impl BaseEvent {
    /// A header with the given code and value. Id and time are assigned
    /// when the event is broadcast.
    pub fn new(code: i32, value: i32) -> Self {
        Self {
            code,
            value,
            ..Self::default()
        }
    }

    /// Decode the header from an event document.
    pub fn decode(json: &Value) -> Result<Self> {
        if !json.is_object() {
            return Err(EventError::NotAnObject);
        }
        Ok(Self::deserialize(json)?)
    }

    /// Write the header fields into `map`, overwriting existing ones.
    pub fn write_into(&self, map: &mut Map<String, Value>) {
        map.insert(EVENT_ID_KEY.to_string(), Value::from(self.id));
        map.insert(EVENT_CODE_KEY.to_string(), Value::from(self.code));
        map.insert(EVENT_VALUE_KEY.to_string(), Value::from(self.value));
        map.insert(EVENT_TIME_KEY.to_string(), Value::from(self.time));
    }

    /// Fill in an id and timestamp where they are unset.
    pub(crate) fn stamped(mut self) -> Self {
        if self.id == 0 {
            self.id = next_event_id();
        }
        if self.time == 0 {
            self.time = now_millis();
        }
        self
    }
}

/// Service id an event was stamped with, if it carries a valid one.
pub fn service_id_of(json: &Value) -> Option<u16> {
    json.get(SERVICE_ID_KEY)?
        .as_u64()
        .and_then(|id| u16::try_from(id).ok())
}

/// Next process-local event id. Never returns 0.
pub fn next_event_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    loop {
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
