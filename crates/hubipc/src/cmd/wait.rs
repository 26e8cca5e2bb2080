use std::sync::Arc;

use hubipc_service::{Sender, SenderConfig};

use crate::cmd::{install_ctrlc_handler, parse_duration, WaitArgs};
use crate::exit::{service_error, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_availability, OutputFormat};

pub fn run(args: WaitArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let sender = Arc::new(
        Sender::new(SenderConfig::default())
            .map_err(|err| service_error("sender setup failed", err))?,
    );

    let interrupted = Arc::clone(&sender);
    install_ctrlc_handler(move || interrupted.shutdown())?;

    let available = sender.wait_for_available(args.port, timeout);
    print_availability(args.port, available, format);
    Ok(if available { SUCCESS } else { TIMEOUT })
}
