use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod ping;
pub mod publish;
pub mod send;
pub mod serve;
pub mod subscribe;
pub mod version;
pub mod wait;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an echo service on a port.
    Serve(ServeArgs),
    /// Send one request and print the response.
    Send(SendArgs),
    /// Check whether a service answers pings.
    Ping(PingArgs),
    /// Block until a service answers pings.
    Wait(WaitArgs),
    /// Broadcast one event.
    Publish(PublishArgs),
    /// Print events from the event channel.
    Subscribe(SubscribeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Ping(args) => ping::run(args, format),
        Command::Wait(args) => wait::run(args, format),
        Command::Publish(args) => publish::run(args, format),
        Command::Subscribe(args) => subscribe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Address to bind.
    #[arg(long, default_value_t = Ipv4Addr::LOCALHOST)]
    pub host: Ipv4Addr,
    /// Request code that answers SUCCESS and stops the service.
    #[arg(long, default_value_t = 1000, allow_negative_numbers = true)]
    pub stop_code: i32,
    /// Maximum worker threads.
    #[arg(long, default_value_t = 5)]
    pub max_threads: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Port of the target service.
    pub port: u16,
    /// Request code.
    #[arg(long, short = 'c', allow_negative_numbers = true)]
    pub code: i32,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Do not wait for a response.
    #[arg(long)]
    pub no_wait: bool,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Port of the target service.
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Port of the target service.
    pub port: u16,
    /// Give up after this long (e.g. 30s). Waits forever when omitted.
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Service id stamped on the event.
    #[arg(long, short = 's')]
    pub service_id: u16,
    /// Event code. Adds the base event header when set.
    #[arg(long, allow_negative_numbers = true)]
    pub code: Option<i32>,
    /// Event value for the base event header.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true, requires = "code")]
    pub value: i32,
    /// JSON object to broadcast.
    #[arg(long, default_value = "{}")]
    pub json: String,
    /// UDP port of the event channel.
    #[arg(long, env = "HUBIPC_EVENT_PORT", default_value_t = hubipc_transport::DEFAULT_EVENT_PORT)]
    pub event_port: u16,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Only print events from this service. All services when omitted.
    #[arg(long, short = 's')]
    pub service_id: Option<u16>,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// UDP port of the event channel.
    #[arg(long, env = "HUBIPC_EVENT_PORT", default_value_t = hubipc_transport::DEFAULT_EVENT_PORT)]
    pub event_port: u16,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub(crate) fn install_ctrlc_handler(on_signal: impl Fn() + Send + 'static) -> CliResult<()> {
    ctrlc::set_handler(on_signal).map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }
}
