//! Thin wrappers over the socket calls `std::net` does not expose.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

fn cvt(rc: libc::c_int) -> std::io::Result<libc::c_int> {
    if rc < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

pub(crate) fn set_cloexec(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: fcntl on a caller-owned open descriptor with integer arguments.
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    // SAFETY: as above.
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
    Ok(())
}

pub(crate) fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: fcntl on a caller-owned open descriptor with integer arguments.
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    // SAFETY: as above.
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    Ok(())
}

/// Open an IPv4 socket of the given type (`SOCK_STREAM` / `SOCK_DGRAM`).
pub(crate) fn socket_v4(ty: libc::c_int) -> std::io::Result<OwnedFd> {
    // SAFETY: socket(2) takes plain integer arguments.
    let fd = cvt(unsafe { libc::socket(libc::AF_INET, ty, 0) })?;
    // SAFETY: socket(2) succeeded; the descriptor is open and exclusively ours.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    set_cloexec(fd)?;
    Ok(owned)
}

fn set_int_option(
    fd: RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> std::io::Result<()> {
    // SAFETY: `value` lives for the duration of the call and the length matches its type.
    cvt(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

/// Enable `SO_REUSEADDR`, and `SO_REUSEPORT` where the platform has it.
pub(crate) fn set_reuse(fd: RawFd) -> std::io::Result<()> {
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "freebsd"
    ))]
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1)?;
    Ok(())
}

fn in_addr(ip: Ipv4Addr) -> libc::in_addr {
    libc::in_addr {
        s_addr: u32::from(ip).to_be(),
    }
}

pub(crate) fn bind_v4(fd: RawFd, addr: SocketAddrV4) -> std::io::Result<()> {
    // SAFETY: an all-zero sockaddr_in is a valid value; the relevant fields are set below.
    let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr = in_addr(*addr.ip());

    // SAFETY: `sa` is a fully initialised sockaddr_in and the length matches it.
    cvt(unsafe {
        libc::bind(
            fd,
            (&sa as *const libc::sockaddr_in).cast::<libc::sockaddr>(),
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

pub(crate) fn listen(fd: RawFd, backlog: libc::c_int) -> std::io::Result<()> {
    // SAFETY: listen(2) on a bound stream socket owned by the caller.
    cvt(unsafe { libc::listen(fd, backlog) })?;
    Ok(())
}

/// Route outgoing multicast through the interface owning `iface`.
pub(crate) fn set_multicast_if(fd: RawFd, iface: Ipv4Addr) -> std::io::Result<()> {
    let addr = in_addr(iface);
    // SAFETY: `addr` lives for the duration of the call and the length matches its type.
    cvt(unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            (&addr as *const libc::in_addr).cast::<libc::c_void>(),
            std::mem::size_of::<libc::in_addr>() as libc::socklen_t,
        )
    })?;
    Ok(())
}
