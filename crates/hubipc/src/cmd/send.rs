use std::fs;

use hubipc_frame::Envelope;
use hubipc_service::{Sender, SenderConfig};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{service_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_envelope, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let request = Envelope::new(args.code, resolve_payload(&args)?);
    let sender = Sender::new(SenderConfig::default())
        .map_err(|err| service_error("sender setup failed", err))?;

    if args.no_wait {
        sender
            .send_only(args.port, &request)
            .map_err(|err| service_error("send failed", err))?;
        return Ok(SUCCESS);
    }

    let response = sender
        .send_request(args.port, &request, Some(timeout))
        .map_err(|err| service_error("send failed", err))?;
    print_envelope(&response, args.port, format);
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(json: Option<&str>, data: Option<&str>) -> SendArgs {
        SendArgs {
            port: 1,
            code: 42,
            json: json.map(str::to_string),
            data: data.map(str::to_string),
            file: None,
            no_wait: false,
            timeout: "5s".to_string(),
        }
    }

    #[test]
    fn payload_defaults_to_empty() {
        assert!(resolve_payload(&args(None, None)).unwrap().is_empty());
    }

    #[test]
    fn json_payload_is_validated() {
        assert_eq!(
            resolve_payload(&args(Some(r#"{"x":1}"#), None)).unwrap(),
            br#"{"x":1}"#
        );
        let err = resolve_payload(&args(Some("{nope"), None)).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn data_payload_is_sent_verbatim() {
        assert_eq!(resolve_payload(&args(None, Some("null"))).unwrap(), b"null");
    }
}
