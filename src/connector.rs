//! Active dial path.
//!
//! A [`TcpConnector`] performs a non-blocking IPv4 connect. Immediate
//! success registers for readable events right away; `EINPROGRESS`
//! registers for readable + writable and resolves the outcome on the
//! first writable event via `SO_ERROR`. Once connected it behaves as
//! a connection peer: buffered reads with a callback, buffered sends
//! with back-pressure, and the same blocking and coroutine-aware send
//! variants.

use crate::event::Ready;
use crate::event_loop::{EventLoop, EventSink};
use crate::sched::yield_now;
use crate::stream::{SendError, Stream};
use crate::sys;

use log::{error, info};
use std::cell::{Cell, RefCell};
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

/// Read callback for dialed connections; same contract as
/// [`crate::conn::ReadCallback`].
pub type ReadCallback = dyn Fn(&Rc<TcpConnector>) -> i32;

/// Close callback; fires at most once with the descriptor value.
pub type CloseCallback = dyn FnOnce(RawFd);

/// A buffered, non-blocking dialed connection.
pub struct TcpConnector {
    weak_self: Weak<TcpConnector>,
    stream: Stream,
    read_cb: RefCell<Option<Rc<ReadCallback>>>,
    close_cb: RefCell<Option<Box<CloseCallback>>>,
    connected: Cell<bool>,
    connect_in_progress: Cell<bool>,
}

impl TcpConnector {
    pub fn new(ev_loop: Rc<EventLoop>) -> io::Result<Rc<Self>> {
        let fd = sys::sys_socket_v4()?;
        Ok(Rc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            stream: Stream::new(fd, ev_loop),
            read_cb: RefCell::new(None),
            close_cb: RefCell::new(None),
            connected: Cell::new(false),
            connect_in_progress: Cell::new(false),
        }))
    }

    pub fn fd(&self) -> RawFd {
        self.stream.fd()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub fn set_read_callback(&self, cb: impl Fn(&Rc<TcpConnector>) -> i32 + 'static) {
        *self.read_cb.borrow_mut() = Some(Rc::new(cb));
    }

    pub fn set_close_callback(&self, cb: impl FnOnce(RawFd) + 'static) {
        *self.close_cb.borrow_mut() = Some(Box::new(cb));
    }

    /// Dials `ip:port` without blocking.
    ///
    /// Returns `Ok` both on immediate success and on a connect still
    /// in progress; a connect that fails later is delivered through
    /// the close callback. An immediate failure is returned here and
    /// nothing is registered.
    pub fn connect(&self, ip: &str, port: u16) -> io::Result<()> {
        if self.stream.closed() {
            return Err(io::Error::from_raw_os_error(libc::ESHUTDOWN));
        }

        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid IPv4 address"))?;

        self.stream.sock().set_nonblocking();
        self.stream.sock().set_keepalive();

        let sink: Weak<dyn EventSink> = self.weak_self.clone();
        let fd = self.fd();

        match sys::sys_connect_v4(fd, ip, port) {
            Ok(()) => {
                self.connected.set(true);
                if let Err(e) = self.stream.register(sink, Ready::readable()) {
                    self.close();
                    return Err(e);
                }
                info!("connected immediately to {ip}:{port}");
                Ok(())
            }
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                self.connect_in_progress.set(true);
                if let Err(e) = self.stream.register(sink, Ready::readable_writable()) {
                    self.close();
                    return Err(e);
                }
                info!("connecting asynchronously to {ip}:{port}");
                Ok(())
            }
            Err(e) => {
                error!("connect to {ip}:{port} failed: {e}");
                Err(e)
            }
        }
    }

    pub fn readable_size(&self) -> usize {
        self.stream.readable_size()
    }

    pub fn read_all(&self) -> Vec<u8> {
        self.stream.read_all()
    }

    pub fn read_until(&self, terminator: u8) -> Option<Vec<u8>> {
        self.stream.read_until(terminator)
    }

    pub fn read_until_crlf(&self) -> Option<Vec<u8>> {
        self.stream.read_until_crlf()
    }

    pub fn read_n(&self, n: usize) -> Option<Vec<u8>> {
        self.stream.read_n(n)
    }

    /// Buffered, non-blocking send; see [`crate::conn::TcpConn::send`].
    pub fn send(&self, data: &[u8]) -> Result<(), SendError> {
        let res = self.stream.send(data);
        if let Err(SendError::Io(e)) = &res {
            error!("send failed on fd {}: {e}", self.fd());
            self.close();
        }
        res
    }

    /// Synchronous send escape hatch; see
    /// [`crate::conn::TcpConn::send_blocking`].
    pub fn send_blocking(&self, data: &[u8]) -> Result<(), SendError> {
        let res = self.stream.send_blocking(data);
        if let Err(SendError::Io(e)) = &res {
            error!("blocking send failed on fd {}: {e}", self.fd());
            self.close();
        }
        res
    }

    /// Coroutine-aware send; suspends while the payload does not fit
    /// the send buffer.
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

    /// Closes the connector: fires the close callback (once), then
    /// closes the socket. Idempotent.
    pub fn close(&self) {
        if self.stream.mark_closed() {
            return;
        }
        let fd = self.fd();
        info!("connector closing fd {fd}");

        self.stream.deregister();
        if let Some(cb) = self.close_cb.borrow_mut().take() {
            cb(fd);
        }
        self.stream.close_socket();
    }

    /// Resolves a pending non-blocking connect on the first writable
    /// event.
    fn handle_connect(&self) {
        match sys::sys_take_socket_error(self.fd()) {
            Ok(None) => {}
            Ok(Some(e)) => {
                error!("async connect failed on fd {}: {e}", self.fd());
                self.close();
                return;
            }
            Err(e) => {
                error!("SO_ERROR query failed on fd {}: {e}", self.fd());
                self.close();
                return;
            }
        }

        self.connect_in_progress.set(false);
        self.connected.set(true);

        // Established; stop watching writability until there is data
        // queued to flush.
        if let Err(e) = self.stream.set_interest(Ready::readable()) {
            error!("failed to re-arm connector fd {}: {e}", self.fd());
            self.close();
            return;
        }

        info!("async connect succeeded on fd {}", self.fd());
    }

    fn handle_read(this: &Rc<Self>) {
        if let Err(e) = this.stream.drain_read() {
            error!("read failed on fd {}: {e}", this.fd());
            this.close();
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
            self.close();
        }
    }
}

impl EventSink for TcpConnector {
    fn on_ready(self: Rc<Self>, events: Ready) {
        if self.stream.closed() {
            return;
        }

        if events.error || events.hangup {
            error!("error readiness on connector fd {}", self.fd());
            self.close();
            return;
        }

        if self.connect_in_progress.get() && events.writable {
            self.handle_connect();
            if self.stream.closed() {
                return;
            }
        }

        if events.readable || events.peer_hup {
            Self::handle_read(&self);
            if self.stream.closed() {
                return;
            }
        }

        if events.writable && !self.connect_in_progress.get() {
            self.handle_write();
            if self.stream.closed() {
                return;
            }
        }

        if self.stream.peer_shutdown() && self.stream.buffers_empty() {
            self.close();
        }
    }
}
