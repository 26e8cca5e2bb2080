//! Reserved message codes.
//!
//! Negative codes are handled below the application handler. Codes in
//! `(SUCCESS, GENERAL_ERROR]` report failures and must not be used as
//! ordinary application codes.

/// Request completed.
pub const SUCCESS: i32 = 0;

/// Could not connect to the target service.
pub const CONNECT_ERROR: i32 = 1;

/// Writing the request failed.
pub const SEND_ERROR: i32 = 2;

/// Reading the response failed.
pub const READ_ERROR: i32 = 3;

/// The peer did not become ready in time.
pub const TIMEOUT: i32 = 4;

/// The socket was closed by an explicit shutdown.
pub const SERVICE_DISABLED: i32 = 5;

/// The request was malformed or not understood.
pub const INVALID_REQUEST: i32 = 6;

/// Returned by a handler that wants its receiver shut down after replying.
pub const SHUTDOWN_REQUESTED: i32 = 7;

/// Any other failure. Upper bound of the failure range.
pub const GENERAL_ERROR: i32 = 8;

/// Liveness probe, answered without reaching the handler.
pub const PING_REQUEST: i32 = -75;

/// Answer to [`PING_REQUEST`].
pub const PING_RESPONSE: i32 = -74;

/// Returns true if `code` is in the reserved failure range.
pub fn is_failure(code: i32) -> bool {
    code > SUCCESS && code <= GENERAL_ERROR
}

/// Returns true if `code` is reserved (failure range or negative sentinel).
pub fn is_reserved(code: i32) -> bool {
    code < SUCCESS || is_failure(code)
}

/// Returns a human-readable name for a code.
pub fn code_name(code: i32) -> &'static str {
    match code {
        SUCCESS => "SUCCESS",
        CONNECT_ERROR => "CONNECT_ERROR",
        SEND_ERROR => "SEND_ERROR",
        READ_ERROR => "READ_ERROR",
        TIMEOUT => "TIMEOUT",
        SERVICE_DISABLED => "SERVICE_DISABLED",
        INVALID_REQUEST => "INVALID_REQUEST",
        SHUTDOWN_REQUESTED => "SHUTDOWN_REQUESTED",
        GENERAL_ERROR => "GENERAL_ERROR",
        PING_REQUEST => "PING_REQUEST",
        PING_RESPONSE => "PING_RESPONSE",
        c if c < 0 => "RESERVED",
        _ => "APPLICATION",
    }
}
