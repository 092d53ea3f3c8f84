//! Shared buffered-stream state for connections and connectors.
//!
//! A [`Stream`] bundles the socket, the receive/send buffers and the
//! current readiness mask, and implements the byte-level read drain
//! and write pump. The connection-lifetime policy on top of it (when
//! to fire callbacks, when to tear down) lives in [`crate::conn`] and
//! [`crate::connector`].

use crate::buffer::MessageBuffer;
use crate::event::Ready;
use crate::event_loop::{EventLoop, EventSink};
use crate::socket::TcpSocket;

use log::warn;
use std::cell::{Cell, RefCell};
use std::io;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use thiserror::Error;

/// Errors surfaced by the buffered send paths.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection is closed; nothing was sent.
    #[error("connection is closed")]
    Shutdown,

    /// The send buffer cannot absorb the whole payload; nothing was
    /// queued (back-pressure, the connection stays open).
    #[error("send buffer full")]
    WouldOverflow,

    /// Fatal I/O error; the connection is being torn down.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One registered, buffered, non-blocking byte stream.
pub(crate) struct Stream {
    sock: TcpSocket,
    ev_loop: Rc<EventLoop>,
    rcv_buf: RefCell<MessageBuffer>,
    snd_buf: RefCell<MessageBuffer>,
    interest: Cell<Ready>,
    registered: Cell<bool>,
    closed: Cell<bool>,
    peer_shutdown: Cell<bool>,
}

impl Stream {
    pub(crate) fn new(fd: RawFd, ev_loop: Rc<EventLoop>) -> Self {
        Self {
            sock: TcpSocket::new(fd),
            ev_loop,
            rcv_buf: RefCell::new(MessageBuffer::new()),
            snd_buf: RefCell::new(MessageBuffer::new()),
            interest: Cell::new(Ready::default()),
            registered: Cell::new(false),
            closed: Cell::new(false),
            peer_shutdown: Cell::new(false),
        }
    }

    pub(crate) fn sock(&self) -> &TcpSocket {
        &self.sock
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.sock.fd()
    }

    pub(crate) fn closed(&self) -> bool {
        self.closed.get()
    }

    /// Marks the stream closed; returns whether it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed.replace(true)
    }

    pub(crate) fn peer_shutdown(&self) -> bool {
        self.peer_shutdown.get()
    }

    pub(crate) fn buffers_empty(&self) -> bool {
        self.rcv_buf.borrow().is_empty() && self.snd_buf.borrow().is_empty()
    }

    /// Registers with the event loop for `ready` events.
    pub(crate) fn register(&self, sink: Weak<dyn EventSink>, ready: Ready) -> io::Result<()> {
        self.ev_loop.add(self.sock.fd(), ready, sink)?;
        self.interest.set(ready);
        self.registered.set(true);
        Ok(())
    }

    /// Drops the event-loop registration, if any. Failures are
    /// already logged by the loop and cannot be acted on here: the
    /// stream is being torn down regardless.
    pub(crate) fn deregister(&self) {
        if self.registered.replace(false) {
            let _ = self.ev_loop.remove(self.sock.fd());
        }
    }

    /// Re-programs readiness to exactly `ready`.
    pub(crate) fn set_interest(&self, ready: Ready) -> io::Result<()> {
        self.ev_loop.modify(self.sock.fd(), ready)?;
        self.interest.set(ready);
        Ok(())
    }

    fn enable_write(&self) -> io::Result<()> {
        let mut ready = self.interest.get();
        if ready.writable {
            return Ok(());
        }
        ready.writable = true;
        self.set_interest(ready)
    }

    fn disable_write(&self) -> io::Result<()> {
        let mut ready = self.interest.get();
        if !ready.writable {
            return Ok(());
        }
        ready.writable = false;
        self.set_interest(ready)
    }

    /// Drains the socket into the receive buffer until it would
    /// block, the peer sends FIN, or the buffer is full.
    ///
    /// A full buffer breaks the loop without reading: leaving bytes
    /// in the kernel queue is what pushes back on the peer. EOF sets
    /// `peer_shutdown` and is not an error; local writes may still
    /// proceed. A fatal error is returned for the caller to act on.
    pub(crate) fn drain_read(&self) -> io::Result<()> {
        let mut buf = self.rcv_buf.borrow_mut();
        loop {
            if buf.writable_tail() == 0 {
                if buf.is_full() {
                    break;
                }
                buf.compact();
            }
            match self.sock.read(buf.tail_mut()) {
                Ok(0) => {
                    self.peer_shutdown.set(true);
                    break;
                }
                Ok(n) => buf.write_commit(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Pumps the send buffer until empty or the socket would block;
    /// disarms writable readiness once drained.
    pub(crate) fn flush_write(&self) -> io::Result<()> {
        let mut snd = self.snd_buf.borrow_mut();
        while !snd.is_empty() {
            match self.sock.send(snd.peek()) {
                Ok(0) => {
                    // A zero-length send here is unexpected; leave the
                    // rest for the next writable event rather than spin.
                    warn!("send returned 0 on fd {}", self.fd());
                    return Ok(());
                }
                Ok(n) => snd.read_commit(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        drop(snd);
        self.disable_write()
    }

    /// Buffered, non-blocking send.
    ///
    /// Either the whole payload is accepted (handed to the kernel,
    /// queued, or split between the two) or nothing is: a payload
    /// larger than the remaining buffer space is refused with
    /// [`SendError::WouldOverflow`] before any byte moves.
    pub(crate) fn send(&self, data: &[u8]) -> Result<(), SendError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.closed.get() {
            return Err(SendError::Shutdown);
        }

        let mut snd = self.snd_buf.borrow_mut();
        if snd.free_after_compact() < data.len() {
            return Err(SendError::WouldOverflow);
        }

        // Bytes already queued: append behind them and wait for the
        // next writable event, preserving order.
        if !snd.is_empty() {
            snd.write(data);
            drop(snd);
            self.enable_write()?;
            return Ok(());
        }

        // Empty queue: try one direct send.
        let n = loop {
            match self.sock.send(data) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    snd.write(data);
                    drop(snd);
                    self.enable_write()?;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if n < data.len() {
            snd.write(&data[n..]);
            drop(snd);
            self.enable_write()?;
        }
        Ok(())
    }

    /// Synchronous escape hatch: drains the queued bytes and then the
    /// whole payload, busy-retrying while the socket would block.
    pub(crate) fn send_blocking(&self, data: &[u8]) -> Result<(), SendError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.closed.get() {
            return Err(SendError::Shutdown);
        }

        let mut snd = self.snd_buf.borrow_mut();
        while !snd.is_empty() {
            match self.sock.send(snd.peek()) {
                Ok(n) => snd.read_commit(n),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        drop(snd);
        self.disable_write()?;

        let mut off = 0;
        while off < data.len() {
            match self.sock.send(&data[off..]) {
                Ok(n) => off += n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Free send-buffer space after compaction; the capacity gate for
    /// the coroutine-aware send.
    pub(crate) fn send_space(&self) -> usize {
        self.snd_buf.borrow().free_after_compact()
    }

    pub(crate) fn close_socket(&self) {
        self.sock.close();
    }

    // Receive-side consumption helpers shared by connection and
    // connector.

    pub(crate) fn readable_size(&self) -> usize {
        self.rcv_buf.borrow().readable_size()
    }

    pub(crate) fn read_all(&self) -> Vec<u8> {
        if self.closed.get() {
            return Vec::new();
        }
        let mut buf = self.rcv_buf.borrow_mut();
        let data = buf.peek().to_vec();
        buf.read_commit(data.len());
        data
    }

    pub(crate) fn read_until(&self, terminator: u8) -> Option<Vec<u8>> {
        if self.closed.get() {
            return None;
        }
        let mut buf = self.rcv_buf.borrow_mut();
        let data = buf.peek_until(terminator)?.to_vec();
        // Consume the terminator as well; the returned span excludes it.
        buf.read_commit(data.len() + 1);
        Some(data)
    }

    pub(crate) fn read_until_crlf(&self) -> Option<Vec<u8>> {
        if self.closed.get() {
            return None;
        }
        let mut buf = self.rcv_buf.borrow_mut();
        let (data, consumed) = {
            let span = buf.peek();
            let pos = span.windows(2).position(|w| w == b"\r\n")?;
            (span[..pos].to_vec(), pos + 2)
        };
        buf.read_commit(consumed);
        Some(data)
    }

    pub(crate) fn read_n(&self, n: usize) -> Option<Vec<u8>> {
        if self.closed.get() {
            return None;
        }
        let mut buf = self.rcv_buf.borrow_mut();
        let data = buf.peek_n(n)?.to_vec();
        buf.read_commit(n);
        Some(data)
    }
}
