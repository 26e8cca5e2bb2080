use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use hubipc_events::{BaseEvent, ConsumerConfig, EventConsumer, SUBSCRIBE_ALL};
use hubipc_transport::EventChannelConfig;
use serde_json::Value;

use crate::cmd::{install_ctrlc_handler, SubscribeArgs};
use crate::exit::{event_error, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat};

const SIGNAL_CHECK: Duration = Duration::from_millis(200);

pub fn run(args: SubscribeArgs, format: OutputFormat) -> CliResult<i32> {
    let consumer = EventConsumer::new(ConsumerConfig {
        channel: EventChannelConfig {
            port: args.event_port,
            ..EventChannelConfig::default()
        },
        ..ConsumerConfig::default()
    });

    let (tx, rx) = mpsc::channel::<(BaseEvent, Value)>();
    let tx = Mutex::new(tx);
    let forward = move |event: &BaseEvent, json: &Value| {
        let sent = tx
            .lock()
            .map(|tx| tx.send((*event, json.clone())).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::debug!(code = event.code, "subscriber gone, event discarded");
        }
    };

    let service_id = args.service_id.unwrap_or(SUBSCRIBE_ALL);
    consumer
        .start_listener(service_id, Arc::new(forward))
        .map_err(|err| event_error("subscribe failed", err))?;
    tracing::info!(service_id, port = args.event_port, "listening for events");

    let running = Arc::new(AtomicBool::new(true));
    let signalled = Arc::clone(&running);
    install_ctrlc_handler(move || signalled.store(false, Ordering::SeqCst))?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let (event, json) = match rx.recv_timeout(SIGNAL_CHECK) {
            Ok(received) => received,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        print_event(&event, &json, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    consumer.shutdown_listener();
    Ok(SUCCESS)
}
