use std::sync::mpsc;

use hubipc_frame::Envelope;
use hubipc_service::{HandlerStatus, Receiver, ReceiverConfig};

use crate::cmd::{install_ctrlc_handler, ServeArgs};
use crate::exit::{service_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

/// Echo handler: answers every request with its own code and payload.
pub(crate) fn echo_handler(
    stop_code: i32,
) -> impl Fn(&Envelope, &mut Envelope) -> HandlerStatus + Send + Sync + 'static {
    move |request, response| {
        tracing::info!(code = request.code, size = request.payload.len(), "echoing request");
        response.payload = request.payload.clone();
        if request.code == stop_code {
            return HandlerStatus::Shutdown;
        }
        response.code = request.code;
        HandlerStatus::Done
    }
}

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let config = ReceiverConfig {
        host: args.host,
        max_threads: args.max_threads,
        ..ReceiverConfig::default()
    };
    let receiver = Receiver::start("hubipc-echo", args.port, echo_handler(args.stop_code), config)
        .map_err(|err| service_error("start failed", err))?;

    let (done_tx, done_rx) = mpsc::channel();
    receiver.on_shutdown(move || {
        let _ = done_tx.send(());
    });

    let signalled = receiver.clone();
    install_ctrlc_handler(move || {
        signalled.shutdown();
    })?;

    // Scripts read the bound port from the first stdout line.
    println!("{}", receiver.port());

    // Either path into shutdown fires the callback once the pool is drained.
    let _ = done_rx.recv();
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use hubipc_frame::SUCCESS as CODE_SUCCESS;

    use super::*;

    #[test]
    fn echo_keeps_code_and_payload() {
        let handler = echo_handler(1000);
        let mut response = Envelope::empty(CODE_SUCCESS);
        let status = handler(&Envelope::new(42, r#"{"x":1}"#), &mut response);
        assert_eq!(status, HandlerStatus::Done);
        assert_eq!(response.code, 42);
        assert_eq!(response.payload.as_ref(), br#"{"x":1}"#);
    }

    #[test]
    fn stop_code_requests_shutdown() {
        let handler = echo_handler(7000);
        let mut response = Envelope::empty(CODE_SUCCESS);
        assert_eq!(
            handler(&Envelope::empty(7000), &mut response),
            HandlerStatus::Shutdown
        );
    }
}
