use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::waker::Waker;

/// Which direction a readiness wait is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Outcome of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The socket is ready (or has a pending error the next I/O call will report).
    Ready,
    /// Nothing happened within the timeout.
    TimedOut,
    /// The waker fired or the socket descriptor is no longer valid.
    Woken,
}

/// Wait until `fd` is ready for `interest`, the timeout elapses, or `waker` fires.
///
/// `None` waits indefinitely. `EINTR` is retried with the remaining budget.
pub fn wait_ready(
    fd: RawFd,
    interest: Interest,
    timeout: Option<Duration>,
    waker: Option<&Waker>,
) -> std::io::Result<Readiness> {
    if waker.is_some_and(Waker::is_woken) {
        return Ok(Readiness::Woken);
    }

    let events = match interest {
        Interest::Readable => libc::POLLIN,
        Interest::Writable => libc::POLLOUT,
    };

    let mut fds = [
        libc::pollfd {
            fd,
            events,
            revents: 0,
        },
        libc::pollfd {
            fd: waker.map_or(-1, Waker::read_fd),
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    let nfds: libc::nfds_t = if waker.is_some() { 2 } else { 1 };
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => poll_millis(deadline.saturating_duration_since(Instant::now())),
        };

        for pfd in fds.iter_mut() {
            pfd.revents = 0;
        }

        // SAFETY: `fds` is a valid array of at least `nfds` pollfd entries for the call.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), nfds, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(Readiness::TimedOut);
        }

        if waker.is_some() && fds[1].revents != 0 {
            return Ok(Readiness::Woken);
        }

        let revents = fds[0].revents;
        if revents & libc::POLLNVAL != 0 {
            return Ok(Readiness::Woken);
        }
        if revents & (events | libc::POLLERR | libc::POLLHUP) != 0 {
            return Ok(Readiness::Ready);
        }
    }
}

fn poll_millis(remaining: Duration) -> libc::c_int {
    if remaining.is_zero() {
        return 0;
    }
    let millis = remaining.as_millis().max(1);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}
