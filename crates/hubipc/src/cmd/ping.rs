use hubipc_service::{Sender, SenderConfig};

use crate::cmd::PingArgs;
use crate::exit::{service_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_availability, OutputFormat};

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let sender = Sender::new(SenderConfig::default())
        .map_err(|err| service_error("sender setup failed", err))?;
    let available = sender.is_available(args.port);
    print_availability(args.port, available, format);
    Ok(if available { SUCCESS } else { FAILURE })
}
