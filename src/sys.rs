//! Thin wrappers over the libc socket calls the core needs.
//!
//! Every wrapper converts the C return convention into `io::Result`
//! via `io::Error::last_os_error()`; callers classify `WouldBlock`
//! and `Interrupted` themselves.

use libc::{
    AF_INET, F_GETFL, F_SETFL, MSG_NOSIGNAL, O_NONBLOCK, SHUT_RDWR, SOCK_NONBLOCK,
    SOCK_STREAM, SOL_SOCKET, SO_ERROR, SO_KEEPALIVE, SO_RCVBUF, SO_REUSEADDR, SO_REUSEPORT,
    SO_SNDBUF, SOL_TCP, TCP_KEEPCNT, TCP_KEEPIDLE, TCP_KEEPINTVL, TCP_NODELAY, accept4, bind,
    c_int, c_void, close, connect, fcntl, getsockname, getsockopt, listen, read, send, setsockopt,
    shutdown, sockaddr, sockaddr_in, socket, socklen_t,
};
use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;

/// Accept queue depth; also bounds the kernel's SYN backlog.
pub(crate) const LISTEN_BACKLOG: c_int = 128;

fn check(rc: c_int) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Creates an IPv4 stream socket.
pub(crate) fn sys_socket_v4() -> io::Result<RawFd> {
    let fd = unsafe { socket(AF_INET, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Reads into `buf`. The descriptor must be non-blocking.
pub(crate) fn sys_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Sends `buf` with `MSG_NOSIGNAL` so a dead peer surfaces as EPIPE
/// instead of a signal.
pub(crate) fn sys_send(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { send(fd, buf.as_ptr() as *const c_void, buf.len(), MSG_NOSIGNAL) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

pub(crate) fn sys_close(fd: RawFd) -> io::Result<()> {
    check(unsafe { close(fd) })
}

/// Shuts down both halves. An already-disconnected peer (ENOTCONN)
/// is not an error.
pub(crate) fn sys_shutdown(fd: RawFd) -> io::Result<()> {
    match check(unsafe { shutdown(fd, SHUT_RDWR) }) {
        Err(e) if e.raw_os_error() == Some(libc::ENOTCONN) => Ok(()),
        other => other,
    }
}

fn sockaddr_v4(ip: Ipv4Addr, port: u16) -> sockaddr_in {
    let mut addr: sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = AF_INET as _;
    addr.sin_port = port.to_be();
    addr.sin_addr.s_addr = u32::from(ip).to_be();
    addr
}

/// Binds to the wildcard IPv4 address on `port`.
pub(crate) fn sys_bind_v4(fd: RawFd, port: u16) -> io::Result<()> {
    let addr = sockaddr_v4(Ipv4Addr::UNSPECIFIED, port);
    check(unsafe {
        bind(
            fd,
            &addr as *const _ as *const sockaddr,
            mem::size_of::<sockaddr_in>() as socklen_t,
        )
    })
}

pub(crate) fn sys_listen(fd: RawFd) -> io::Result<()> {
    check(unsafe { listen(fd, LISTEN_BACKLOG) })
}

/// Accepts one pending connection, already non-blocking.
pub(crate) fn sys_accept4(fd: RawFd) -> io::Result<RawFd> {
    let mut addr: sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_in>() as socklen_t;
    let conn = unsafe { accept4(fd, &mut addr as *mut _ as *mut sockaddr, &mut len, SOCK_NONBLOCK) };
    if conn < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(conn)
    }
}

/// Initiates a connection to `ip:port`. Non-blocking sockets report
/// EINPROGRESS here and complete via writable readiness.
pub(crate) fn sys_connect_v4(fd: RawFd, ip: Ipv4Addr, port: u16) -> io::Result<()> {
    let addr = sockaddr_v4(ip, port);
    check(unsafe {
        connect(
            fd,
            &addr as *const _ as *const sockaddr,
            mem::size_of::<sockaddr_in>() as socklen_t,
        )
    })
}

/// Returns the locally bound port (useful after binding port 0).
pub(crate) fn sys_local_port(fd: RawFd) -> io::Result<u16> {
    let mut addr: sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_in>() as socklen_t;
    check(unsafe { getsockname(fd, &mut addr as *mut _ as *mut sockaddr, &mut len) })?;
    Ok(u16::from_be(addr.sin_port))
}

/// Reads and clears the pending socket error (SO_ERROR), used to
/// resolve a non-blocking connect.
pub(crate) fn sys_take_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;
    check(unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut _ as *mut c_void,
            &mut len,
        )
    })?;
    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(err)))
    }
}

pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    check(unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) })
}

pub(crate) fn sys_set_blocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    check(unsafe { fcntl(fd, F_SETFL, flags & !O_NONBLOCK) })
}

fn set_opt_int(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    check(unsafe {
        setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    })
}

pub(crate) fn sys_set_nodelay(fd: RawFd) -> io::Result<()> {
    set_opt_int(fd, SOL_TCP, TCP_NODELAY, 1)
}

pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    set_opt_int(fd, SOL_SOCKET, SO_REUSEADDR, 1)
}

pub(crate) fn sys_set_reuseport(fd: RawFd) -> io::Result<()> {
    set_opt_int(fd, SOL_SOCKET, SO_REUSEPORT, 1)
}

/// Enables keep-alive probing: 60 s idle, 5 s between probes, 3
/// probes before the connection is declared dead.
pub(crate) fn sys_set_keepalive(fd: RawFd, idle: c_int, interval: c_int, count: c_int) -> io::Result<()> {
    set_opt_int(fd, SOL_SOCKET, SO_KEEPALIVE, 1)?;
    set_opt_int(fd, SOL_TCP, TCP_KEEPIDLE, idle)?;
    set_opt_int(fd, SOL_TCP, TCP_KEEPINTVL, interval)?;
    set_opt_int(fd, SOL_TCP, TCP_KEEPCNT, count)
}

pub(crate) fn sys_set_rcvbuf(fd: RawFd, size: c_int) -> io::Result<()> {
    set_opt_int(fd, SOL_SOCKET, SO_RCVBUF, size)
}

pub(crate) fn sys_set_sndbuf(fd: RawFd, size: c_int) -> io::Result<()> {
    set_opt_int(fd, SOL_SOCKET, SO_SNDBUF, size)
}
