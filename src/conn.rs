//! Per-socket connection state machine.
//!
//! A [`TcpConn`] wraps one accepted socket: it registers for
//! readable + peer-hangup events, drains incoming bytes into its
//! receive buffer, hands them to the user's read callback, and pumps
//! queued outgoing bytes when the socket turns writable.
//!
//! Lifetime: the owning server's registry holds the authoritative
//! reference. During dispatch the connection receives an extra
//! `Rc` share (the `on_ready` receiver), so user code may close it
//! mid-callback without pulling the object out from under the
//! handler. The first terminal condition — fatal I/O error,
//! error/hangup readiness, remote EOF with drained buffers, or an
//! explicit close — runs the removal protocol exactly once: the
//! close callback fires with the descriptor, the socket closes, and
//! the registry entry disappears.

use crate::event::Ready;
use crate::event_loop::{EventLoop, EventSink};
use crate::sched::yield_now;
use crate::server::TcpServer;
use crate::stream::{SendError, Stream};

use log::{debug, error};
use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

/// Read callback: invoked while the receive buffer holds bytes; a
/// negative return stops the dispatch loop, leaving the remaining
/// bytes for a later event.
pub type ReadCallback = dyn Fn(&Rc<TcpConn>) -> i32;

/// Close callback: invoked at most once, with the descriptor value,
/// before the socket is closed.
pub type CloseCallback = dyn FnOnce(RawFd);

/// A buffered, non-blocking server-side connection.
pub struct TcpConn {
    stream: Stream,
    owner: RefCell<Weak<TcpServer>>,
    read_cb: RefCell<Option<Rc<ReadCallback>>>,
    close_cb: RefCell<Option<Box<CloseCallback>>>,
    removed: Cell<bool>,
}

impl TcpConn {
    /// Wraps an accepted descriptor. The connection does not receive
    /// events until [`register`](Self::register) is called; the accept
    /// path defers that until after the new-connection callback has
    /// run, so a close callback installed there observes a
    /// registration failure too.
    pub(crate) fn new(fd: RawFd, ev_loop: Rc<EventLoop>) -> Rc<Self> {
        let conn = Rc::new(Self {
            stream: Stream::new(fd, ev_loop),
            owner: RefCell::new(Weak::new()),
            read_cb: RefCell::new(None),
            close_cb: RefCell::new(None),
            removed: Cell::new(false),
        });

        conn.stream.sock().set_nonblocking();
        conn.stream.sock().set_keepalive();
        conn
    }

    /// Registers for readable + peer-hangup events.
    ///
    /// On failure the connection is closed on the spot, firing the
    /// close callback; the caller must check
    /// [`is_removed`](Self::is_removed) before retaining it.
    pub(crate) fn register(this: &Rc<Self>) {
        if this.removed.get() {
            return;
        }
        let sink: Weak<dyn EventSink> = Rc::downgrade(&(Rc::clone(this) as Rc<dyn EventSink>));
        let ready = Ready::readable().with_peer_hup();
        if let Err(e) = this.stream.register(sink, ready) {
            error!("failed to register connection fd {}: {e}", this.fd());
            this.remove();
        }
    }

    pub fn fd(&self) -> RawFd {
        self.stream.fd()
    }

    pub(crate) fn set_owner(&self, server: Weak<TcpServer>) {
        *self.owner.borrow_mut() = server;
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.get()
    }

    /// Whether the peer has closed its write side (FIN observed).
    /// Local sends may still proceed until [`close`](Self::close).
    pub fn is_peer_shutdown(&self) -> bool {
        self.stream.peer_shutdown()
    }

    pub fn set_read_callback(&self, cb: impl Fn(&Rc<TcpConn>) -> i32 + 'static) {
        *self.read_cb.borrow_mut() = Some(Rc::new(cb));
    }

    pub fn set_close_callback(&self, cb: impl FnOnce(RawFd) + 'static) {
        *self.close_cb.borrow_mut() = Some(Box::new(cb));
    }

    /// Bytes currently readable.
    pub fn readable_size(&self) -> usize {
        self.stream.readable_size()
    }

    /// Consumes and returns the whole readable span.
    pub fn read_all(&self) -> Vec<u8> {
        self.stream.read_all()
    }

    /// Consumes and returns the span up to (excluding) `terminator`,
    /// or `None` if it has not arrived yet. The terminator itself is
    /// consumed too.
    pub fn read_until(&self, terminator: u8) -> Option<Vec<u8>> {
        self.stream.read_until(terminator)
    }

    /// [`read_until`](Self::read_until) for a CRLF pair.
    pub fn read_until_crlf(&self) -> Option<Vec<u8>> {
        self.stream.read_until_crlf()
    }

    /// Consumes and returns exactly `n` bytes, or `None` (and
    /// consumes nothing) if fewer are buffered.
    pub fn read_n(&self, n: usize) -> Option<Vec<u8>> {
        self.stream.read_n(n)
    }

    /// Buffered, non-blocking send.
    ///
    /// `Ok(())` means the connection has taken ownership of every
    /// byte for delivery — handed to the kernel, queued locally, or
    /// split between the two. It does not mean the peer has received
    /// anything. A payload that does not fit the remaining buffer
    /// space is refused whole with [`SendError::WouldOverflow`].
    pub fn send(&self, data: &[u8]) -> Result<(), SendError> {
        let res = self.stream.send(data);
        if let Err(SendError::Io(e)) = &res {
            error!("send failed on fd {}: {e}", self.fd());
            self.remove();
        }
        res
    }

    /// Synchronous send: drains the queued bytes and then `data`,
    /// busy-retrying while the socket would block. An explicit escape
    /// hatch that never suspends; everything else on this loop stalls
    /// while it runs.
    pub fn send_blocking(&self, data: &[u8]) -> Result<(), SendError> {
        let res = self.stream.send_blocking(data);
        if let Err(SendError::Io(e)) = &res {
            error!("blocking send failed on fd {}: {e}", self.fd());
            self.remove();
        }
        res
    }

    /// Coroutine-aware send: suspends (one cooperative turn at a
    /// time) while the payload does not fit the send buffer, then
    /// sends like [`send`](Self::send).
    ///
    /// Dropping the future while it is still waiting for space has no
    /// side effect; no byte is queued before the capacity check
    /// passes.
    pub async fn send_async(&self, data: &[u8]) -> Result<(), SendError> {
        if data.is_empty() {
            return Ok(());
        }
        loop {
            if self.stream.closed() {
                return Err(SendError::Shutdown);
            }
            if self.stream.send_space() >= data.len() {
                break;
            }
            yield_now().await;
        }
        self.send(data)
    }

    /// Registers this connection with the owning server's subscriber
    /// set.
    pub fn subscribe(&self) {
        if let Some(server) = self.owner.borrow().upgrade() {
            server.subscribe(self.fd());
        }
    }

    pub fn unsubscribe(&self) {
        if let Some(server) = self.owner.borrow().upgrade() {
            server.unsubscribe(self.fd());
        }
    }

    /// Sends `data` to every current subscriber of the owning server.
    pub fn broadcast(&self, data: &[u8]) -> Result<(), SendError> {
        match self.owner.borrow().upgrade() {
            Some(server) => server.broadcast(data),
            None => Err(SendError::Shutdown),
        }
    }

    /// Closes the connection: fires the close callback (once), closes
    /// the socket and ends the server tenure. Idempotent.
    pub fn close(&self) {
        self.remove();
    }

    /// The removal protocol. Runs at most once; every terminal
    /// transition funnels through here.
    fn remove(&self) {
        if self.removed.replace(true) {
            return;
        }
        debug!("closing connection fd {}", self.fd());

        self.stream.mark_closed();
        self.stream.deregister();

        let fd = self.fd();
        if let Some(cb) = self.close_cb.borrow_mut().take() {
            cb(fd);
        }
        self.stream.close_socket();

        if let Some(server) = self.owner.borrow().upgrade() {
            server.forget(fd);
        }
    }

    fn handle_read(this: &Rc<Self>) {
        if let Err(e) = this.stream.drain_read() {
            error!("read failed on fd {}: {e}", this.fd());
            this.remove();
            return;
        }

        while !this.stream.closed() && this.stream.readable_size() > 0 {
            let cb = this.read_cb.borrow().clone();
            let Some(cb) = cb else { break };
            if cb(this) < 0 {
                break;
            }
        }
    }

    fn handle_write(&self) {
        if let Err(e) = self.stream.flush_write() {
            error!("write failed on fd {}: {e}", self.fd());
            self.remove();
        }
    }
}

impl EventSink for TcpConn {
    fn on_ready(self: Rc<Self>, events: Ready) {
        if self.stream.closed() {
            return;
        }

        if events.error || events.hangup {
            error!("error readiness on fd {}", self.fd());
            self.remove();
            return;
        }

        // Peer-hangup is handled through the read path: the drain
        // observes EOF after consuming whatever is still queued.
        if events.readable || events.peer_hup {
            Self::handle_read(&self);
            if self.stream.closed() {
                return;
            }
        }

        if events.writable {
            self.handle_write();
            if self.stream.closed() {
                return;
            }
        }

        // Half-closed by the peer and nothing left to read or flush:
        // the connection has served its purpose.
        if self.stream.peer_shutdown() && self.stream.buffers_empty() {
            self.remove();
        }
    }
}
