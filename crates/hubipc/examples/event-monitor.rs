//! Event monitor: prints every event on the channel, then one of its own.
//!
//! Run with:
//!   cargo run -p hubipc --example event-monitor
//!
//! In another terminal:
//!   cargo run -p hubipc --features cli -- publish -s 7 --code 21 --json '{"room":"hall"}'

use std::sync::Arc;
use std::time::Duration;

use hubipc::events::{BaseEvent, EventConsumer, EventProducer, SUBSCRIBE_ALL};
use serde_json::{json, Value};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let consumer = EventConsumer::global();
    let print = |event: &BaseEvent, json: &Value| {
        eprintln!("event code={} value={} {json}", event.code, event.value);
    };
    consumer.start_listener(SUBSCRIBE_ALL, Arc::new(print))?;

    let producer = EventProducer::init(99, &consumer.config().channel)?;
    producer.broadcast_event(&BaseEvent::new(1, 0), json!({"monitor": "started"}))?;

    std::thread::sleep(Duration::from_secs(30));
    consumer.shutdown_listener();
    Ok(())
}
