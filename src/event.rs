//! Readiness flags exchanged with the epoll facility.

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP};

/// The set of readiness conditions a registration asks for or a
/// dispatch reports.
///
/// `error` and `hangup` are always reported by the kernel regardless
/// of what was registered; `peer_hup` (the remote end closed its
/// write side) must be asked for explicitly.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Ready {
    pub readable: bool,
    pub writable: bool,
    pub peer_hup: bool,
    pub hangup: bool,
    pub error: bool,
}

impl Ready {
    /// Readable only.
    pub fn readable() -> Self {
        Self {
            readable: true,
            ..Self::default()
        }
    }

    /// Readable and writable.
    pub fn readable_writable() -> Self {
        Self {
            readable: true,
            writable: true,
            ..Self::default()
        }
    }

    /// Adds interest in the peer closing its write side.
    pub fn with_peer_hup(mut self) -> Self {
        self.peer_hup = true;
        self
    }

    pub(crate) fn to_epoll(self) -> u32 {
        let mut bits = 0u32;
        if self.readable {
            bits |= EPOLLIN as u32;
        }
        if self.writable {
            bits |= EPOLLOUT as u32;
        }
        if self.peer_hup {
            bits |= EPOLLRDHUP as u32;
        }
        bits
    }

    pub(crate) fn from_epoll(bits: u32) -> Self {
        Self {
            readable: bits & EPOLLIN as u32 != 0,
            writable: bits & EPOLLOUT as u32 != 0,
            peer_hup: bits & EPOLLRDHUP as u32 != 0,
            hangup: bits & EPOLLHUP as u32 != 0,
            error: bits & EPOLLERR as u32 != 0,
        }
    }
}
