use serde_json::Value;

use crate::event::BaseEvent;

/// Decodes and distributes one category of events.
///
/// Called on a pool thread. When both a service adapter and the
/// subscribe-all adapter match, both see the same header and the same
/// document; the document stays alive until both have returned.
pub trait EventAdapter: Send + Sync + 'static {
    fn handle_event(&self, event: &BaseEvent, json: &Value);
}

impl<F> EventAdapter for F
where
    F: Fn(&BaseEvent, &Value) + Send + Sync + 'static,
{
    fn handle_event(&self, event: &BaseEvent, json: &Value) {
        self(event, json)
    }
}
