//! Ownership of a single stream descriptor.

use crate::sys;

use log::error;
use std::cell::Cell;
use std::io;
use std::os::fd::RawFd;

/// Keep-alive tuning applied to every accepted or dialed socket.
const KEEP_IDLE_SECS: libc::c_int = 60;
const KEEP_INTERVAL_SECS: libc::c_int = 5;
const KEEP_COUNT: libc::c_int = 3;

/// Sentinel for a closed descriptor.
const CLOSED_FD: RawFd = -1;

/// A thin handle over one OS stream descriptor.
///
/// Closing is idempotent and replaces the descriptor with the `-1`
/// sentinel; dropping the handle closes it. Option setters are
/// best-effort: failures are logged, never fatal, matching the
/// policy that a missing socket tweak should not kill a connection.
pub struct TcpSocket {
    fd: Cell<RawFd>,
}

impl TcpSocket {
    /// Wraps an existing descriptor.
    pub fn new(fd: RawFd) -> Self {
        Self { fd: Cell::new(fd) }
    }

    pub fn fd(&self) -> RawFd {
        self.fd.get()
    }

    /// Binds to the wildcard IPv4 address on `port`.
    pub fn bind(&self, port: u16) -> io::Result<()> {
        sys::sys_bind_v4(self.fd(), port)
    }

    /// Starts listening with a backlog of 128.
    pub fn listen(&self) -> io::Result<()> {
        sys::sys_listen(self.fd())
    }

    /// The locally bound port.
    pub fn local_port(&self) -> io::Result<u16> {
        sys::sys_local_port(self.fd())
    }

    /// Non-blocking read into `buf`.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        sys::sys_read(self.fd(), buf)
    }

    /// Non-blocking send with SIGPIPE suppressed.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        sys::sys_send(self.fd(), buf)
    }

    pub fn set_nonblocking(&self) {
        if let Err(e) = sys::sys_set_nonblocking(self.fd()) {
            error!("fcntl O_NONBLOCK failed for fd {}: {}", self.fd(), e);
        }
    }

    pub fn set_blocking(&self) {
        if let Err(e) = sys::sys_set_blocking(self.fd()) {
            error!("fcntl blocking failed for fd {}: {}", self.fd(), e);
        }
    }

    pub fn set_nodelay(&self) {
        if let Err(e) = sys::sys_set_nodelay(self.fd()) {
            error!("setsockopt TCP_NODELAY failed for fd {}: {}", self.fd(), e);
        }
    }

    /// Enables SO_REUSEADDR and SO_REUSEPORT.
    pub fn set_reusable(&self) {
        if let Err(e) = sys::sys_set_reuseaddr(self.fd()) {
            error!("setsockopt SO_REUSEADDR failed for fd {}: {}", self.fd(), e);
        }
        if let Err(e) = sys::sys_set_reuseport(self.fd()) {
            error!("setsockopt SO_REUSEPORT failed for fd {}: {}", self.fd(), e);
        }
    }

    /// Keep-alive with 60 s idle, 5 s probe interval, 3 probes.
    pub fn set_keepalive(&self) {
        if let Err(e) =
            sys::sys_set_keepalive(self.fd(), KEEP_IDLE_SECS, KEEP_INTERVAL_SECS, KEEP_COUNT)
        {
            error!("setsockopt keep-alive failed for fd {}: {}", self.fd(), e);
        }
    }

    pub fn set_rcv_buf_size(&self, size: usize) {
        if let Err(e) = sys::sys_set_rcvbuf(self.fd(), size as libc::c_int) {
            error!("setsockopt SO_RCVBUF failed for fd {}: {}", self.fd(), e);
        }
    }

    pub fn set_snd_buf_size(&self, size: usize) {
        if let Err(e) = sys::sys_set_sndbuf(self.fd(), size as libc::c_int) {
            error!("setsockopt SO_SNDBUF failed for fd {}: {}", self.fd(), e);
        }
    }

    /// Shuts down both halves; a peer that already disconnected is
    /// tolerated.
    pub fn shutdown(&self) {
        let fd = self.fd();
        if fd == CLOSED_FD {
            return;
        }
        if let Err(e) = sys::sys_shutdown(fd) {
            error!("shutdown failed for fd {}: {}", fd, e);
        }
    }

    /// Closes the descriptor. Subsequent calls are no-ops.
    pub fn close(&self) {
        let fd = self.fd.get();
        if fd == CLOSED_FD {
            return;
        }
        self.shutdown();
        if let Err(e) = sys::sys_close(fd) {
            error!("close failed for fd {}: {}", fd, e);
        }
        self.fd.set(CLOSED_FD);
    }
}

impl Drop for TcpSocket {
    fn drop(&mut self) {
        self.close();
    }
}
