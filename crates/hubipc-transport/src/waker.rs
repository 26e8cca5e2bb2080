//! Self-pipe used to interrupt threads blocked in a readiness wait.
//!
//! A [`Waker`] owns both ends of a pipe. Threads that must be interruptible
//! include the read end in their `poll(2)` set; [`Waker::wake`] writes a short
//! sentinel into the write end. The pipe is never drained, so once woken it
//! stays readable and every later wait observes the wake-up as well.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::error::Result;

/// Bytes written into the pipe on wake-up.
pub const WAKE_SENTINEL: &[u8] = b"shutdown";

/// A latched, thread-safe shutdown signal backed by a pipe.
#[derive(Debug)]
pub struct Waker {
    read: OwnedFd,
    write: OwnedFd,
    woken: AtomicBool,
}

impl Waker {
    /// Allocate a new pipe pair.
    pub fn new() -> Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` is a writable array of two c_ints as required by pipe(2).
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by us.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        crate::sys::set_cloexec(read.as_raw_fd())?;
        crate::sys::set_cloexec(write.as_raw_fd())?;
        crate::sys::set_nonblocking(read.as_raw_fd())?;
        crate::sys::set_nonblocking(write.as_raw_fd())?;

        Ok(Self {
            read,
            write,
            woken: AtomicBool::new(false),
        })
    }

    /// Tickle the pipe. Only the first call writes; later calls are no-ops.
    pub fn wake(&self) {
        if self.woken.swap(true, Ordering::SeqCst) {
            return;
        }

        // SAFETY: the write end is an open pipe descriptor owned by `self`, and the
        // buffer pointer/length pair describes a valid static slice.
        let rc = unsafe {
            libc::write(
                self.write.as_raw_fd(),
                WAKE_SENTINEL.as_ptr().cast::<libc::c_void>(),
                WAKE_SENTINEL.len(),
            )
        };
        if rc < 0 {
            // A full pipe is still readable, which is all pollers need.
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                warn!(error = %err, "failed to write wake sentinel");
            }
        } else {
            debug!(fd = self.read.as_raw_fd(), "waker tickled");
        }
    }

    /// Whether [`wake`](Self::wake) has been called.
    pub fn is_woken(&self) -> bool {
        self.woken.load(Ordering::SeqCst)
    }

    /// Read end of the pipe, for inclusion in a poll set.
    pub fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}
