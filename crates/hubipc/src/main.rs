mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "hubipc", version, about = "Home-automation IPC CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(
        long,
        value_name = "FORMAT",
        env = "HUBIPC_LOG_FORMAT",
        default_value = "text",
        global = true
    )]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        env = "HUBIPC_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "hubipc", "send", "4100", "--code", "42", "--json", "{\"x\":1}",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "hubipc", "send", "4100", "--code", "42", "--json", "{\"x\":1}", "--data", "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn negative_codes_are_accepted() {
        let cli = Cli::try_parse_from(["hubipc", "send", "4100", "--code", "-75"])
            .expect("reserved codes should parse");
        match cli.command {
            Command::Send(args) => assert_eq!(args.code, -75),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn publish_value_requires_code() {
        let err = Cli::try_parse_from(["hubipc", "publish", "-s", "7", "--value", "3"])
            .expect_err("value without code should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_subscribe_subcommand() {
        let cli = Cli::try_parse_from(["hubipc", "subscribe", "--service-id", "7", "--count", "1"])
            .expect("subscribe args should parse");
        assert!(matches!(cli.command, Command::Subscribe(_)));
    }
}
