use hubipc_events::{BaseEvent, EventProducer, SERVICE_ID_KEY};
use hubipc_transport::EventChannelConfig;
use serde_json::Value;

use crate::cmd::PublishArgs;
use crate::exit::{event_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_event, OutputFormat};

pub fn run(args: PublishArgs, format: OutputFormat) -> CliResult<i32> {
    let mut document: Value = serde_json::from_str(&args.json)
        .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
    if !document.is_object() {
        return Err(CliError::new(USAGE, "--json must be a JSON object"));
    }

    let channel = EventChannelConfig {
        port: args.event_port,
        ..EventChannelConfig::default()
    };
    let producer = EventProducer::init(args.service_id, &channel)
        .map_err(|err| event_error("event channel setup failed", err))?;

    let header = match args.code {
        Some(code) => {
            let sent = producer
                .broadcast_event(&BaseEvent::new(code, args.value), document.clone())
                .map_err(|err| event_error("publish failed", err))?;
            // Print what went on the wire.
            if let Some(map) = document.as_object_mut() {
                sent.write_into(map);
                map.insert(SERVICE_ID_KEY.to_string(), Value::from(args.service_id));
            }
            sent
        }
        None => {
            producer
                .broadcast(&mut document)
                .map_err(|err| event_error("publish failed", err))?;
            BaseEvent::default()
        }
    };

    print_event(&header, &document, format);
    producer.shutdown();
    Ok(SUCCESS)
}
