use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hubipc_events::BaseEvent;
use hubipc_frame::{code::code_name, Envelope};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOutput<'a> {
    port: u16,
    code: i32,
    code_name: &'a str,
    payload_size: usize,
    payload: String,
}

pub fn print_envelope(envelope: &Envelope, port: u16, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EnvelopeOutput {
                port,
                code: envelope.code,
                code_name: code_name(envelope.code),
                payload_size: envelope.payload.len(),
                payload: payload_preview(&envelope.payload),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = table(vec!["PORT", "CODE", "SIZE", "PAYLOAD"]);
            table.add_row(vec![
                port.to_string(),
                format!("{} ({})", envelope.code, code_name(envelope.code)),
                envelope.payload.len().to_string(),
                payload_preview(&envelope.payload),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "port={} code={} ({}) size={} payload={}",
                port,
                envelope.code,
                code_name(envelope.code),
                envelope.payload.len(),
                payload_preview(&envelope.payload)
            );
        }
        OutputFormat::Raw => print_raw(&envelope.payload),
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    service_id: Option<u16>,
    #[serde(flatten)]
    header: &'a BaseEvent,
    event: &'a Value,
}

pub fn print_event(event: &BaseEvent, json: &Value, format: OutputFormat) {
    let service_id = hubipc_events::service_id_of(json);
    match format {
        OutputFormat::Json => print_json(&EventOutput {
            service_id,
            header: event,
            event: json,
        }),
        OutputFormat::Table => {
            let mut table = table(vec!["SERVICE", "ID", "CODE", "VALUE", "EVENT"]);
            table.add_row(vec![
                service_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                event.id.to_string(),
                event.code.to_string(),
                event.value.to_string(),
                json.to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "service={} id={} code={} value={} event={}",
                service_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                event.id,
                event.code,
                event.value,
                json
            );
        }
        OutputFormat::Raw => {
            let mut line = json.to_string();
            line.push('\n');
            print_raw(line.as_bytes());
        }
    }
}

#[derive(Serialize)]
struct AvailabilityOutput {
    port: u16,
    available: bool,
}

pub fn print_availability(port: u16, available: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&AvailabilityOutput { port, available }),
        OutputFormat::Table => {
            let mut table = table(vec!["PORT", "AVAILABLE"]);
            table.add_row(vec![port.to_string(), available.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("port={port} available={available}");
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
