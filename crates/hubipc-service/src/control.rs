use hubipc_frame::Envelope;

/// What a handler wants to happen after its response is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerStatus {
    /// Send the response and keep serving.
    #[default]
    Done,
    /// Send the response with a success code, then shut the receiver down.
    Shutdown,
}

/// Application callback invoked for every non-reserved request.
///
/// The response starts out as an empty envelope with a success code. Runs on
/// a pool thread; anything it blocks on is its own business.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle_request(&self, request: &Envelope, response: &mut Envelope) -> HandlerStatus;
}

impl<F> RequestHandler for F
where
    F: Fn(&Envelope, &mut Envelope) -> HandlerStatus + Send + Sync + 'static,
{
    fn handle_request(&self, request: &Envelope, response: &mut Envelope) -> HandlerStatus {
        self(request, response)
    }
}

/// Answer requests that are handled below the application handler.
///
/// Returns `None` for ordinary application codes.
pub fn control_response(request: &Envelope) -> Option<Envelope> {
    request.is_ping().then(Envelope::pong)
}

#[cfg(test)]
mod tests {
    use hubipc_frame::{PING_RESPONSE, SUCCESS};

    use super::*;

    #[test]
    fn ping_is_answered_without_payload() {
        let response = control_response(&Envelope::new(hubipc_frame::PING_REQUEST, "ignored"))
            .expect("ping should be a control request");
        assert_eq!(response.code, PING_RESPONSE);
        assert!(response.payload.is_empty());
    }

    #[test]
    fn application_codes_reach_the_handler() {
        assert!(control_response(&Envelope::empty(42)).is_none());
        assert!(control_response(&Envelope::pong()).is_none());
    }

    #[test]
    fn closures_are_handlers() {
        let handler = |request: &Envelope, response: &mut Envelope| {
            response.payload = request.payload.clone();
            HandlerStatus::Done
        };
        let mut response = Envelope::default();
        let status = handler.handle_request(&Envelope::new(42, "echo"), &mut response);

        assert_eq!(status, HandlerStatus::Done);
        assert_eq!(response.code, SUCCESS);
        assert_eq!(response.payload.as_ref(), b"echo");
    }
}
