//! Echo service: answers every request with its own code and payload.
//!
//! Run with:
//!   cargo run -p hubipc --example echo-service
//!
//! In another terminal:
//!   cargo run -p hubipc --features cli -- send <port> --code 42 --json '{"hello":"world"}'
//!
//! Send code 1000 to stop it.

use hubipc::frame::Envelope;
use hubipc::service::{HandlerStatus, Receiver, ReceiverConfig};

const STOP: i32 = 1000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let handler = |request: &Envelope, response: &mut Envelope| {
        eprintln!(
            "Received {} bytes with code {}",
            request.payload.len(),
            request.code
        );
        response.payload = request.payload.clone();
        if request.code == STOP {
            return HandlerStatus::Shutdown;
        }
        response.code = request.code;
        HandlerStatus::Done
    };

    let receiver = Receiver::start("echo", 0, handler, ReceiverConfig::default())?;
    eprintln!("Listening on 127.0.0.1:{}", receiver.port());

    receiver.wait_for_shutdown();
    eprintln!("Stopped");
    Ok(())
}
