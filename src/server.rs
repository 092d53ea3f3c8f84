//! Listener lifecycle, connection registry and pub/sub fan-out.

use crate::conn::TcpConn;
use crate::event::Ready;
use crate::event_loop::{EventLoop, EventSink};
use crate::socket::TcpSocket;
use crate::stream::SendError;
use crate::sys;

use log::{debug, error, info};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use thiserror::Error;

/// Fatal server start-up failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to create listen socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to register listen socket: {0}")]
    Register(#[source] io::Error),
}

/// Callback invoked for every accepted connection, with a shared
/// handle; the server keeps the authoritative reference in its
/// registry.
pub type NewConnCallback = dyn Fn(&Rc<TcpConn>);

/// A TCP server: one listen socket, a registry of live connections
/// keyed by descriptor, and a subscriber set for broadcasts.
///
/// The server owns its connections; dropping the server drops them
/// all. Every subscriber descriptor is a registry key — removal from
/// the registry removes the subscription too.
pub struct TcpServer {
    weak_self: Weak<TcpServer>,
    ev_loop: Rc<EventLoop>,
    listen_sock: TcpSocket,
    conns: RefCell<HashMap<RawFd, Rc<TcpConn>>>,
    subscribers: RefCell<HashSet<RawFd>>,
    new_conn_cb: RefCell<Option<Rc<NewConnCallback>>>,
}

impl TcpServer {
    pub fn new(ev_loop: Rc<EventLoop>) -> Result<Rc<Self>, ServerError> {
        let fd = sys::sys_socket_v4().map_err(ServerError::Socket)?;
        Ok(Rc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            ev_loop,
            listen_sock: TcpSocket::new(fd),
            conns: RefCell::new(HashMap::new()),
            subscribers: RefCell::new(HashSet::new()),
            new_conn_cb: RefCell::new(None),
        }))
    }

    /// Binds the wildcard IPv4 address on `port`, starts listening
    /// (backlog 128) and registers the accept path with the loop.
    pub fn start(
        &self,
        port: u16,
        new_conn_cb: impl Fn(&Rc<TcpConn>) + 'static,
    ) -> Result<(), ServerError> {
        self.listen_sock.set_nonblocking();
        self.listen_sock.set_reusable();

        self.listen_sock
            .bind(port)
            .map_err(|source| ServerError::Bind { port, source })?;
        self.listen_sock.listen().map_err(ServerError::Listen)?;

        *self.new_conn_cb.borrow_mut() = Some(Rc::new(new_conn_cb));

        let sink: Weak<dyn EventSink> = self.weak_self.clone();
        self.ev_loop
            .add(self.listen_sock.fd(), Ready::readable(), sink)
            .map_err(ServerError::Register)?;

        info!("server listening on port {}", port);
        Ok(())
    }

    /// The locally bound port; useful after starting on port 0.
    pub fn local_port(&self) -> io::Result<u16> {
        self.listen_sock.local_port()
    }

    fn handle_accept(&self, events: Ready) {
        if events.error || events.hangup || events.peer_hup {
            // One bad readiness report does not kill the server.
            error!("error readiness on listen fd {}", self.listen_sock.fd());
            return;
        }
        if !events.readable {
            return;
        }

        loop {
            let fd = match sys::sys_accept4(self.listen_sock.fd()) {
                Ok(fd) => fd,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("accept failed on fd {}: {e}", self.listen_sock.fd());
                    break;
                }
            };

            debug!("accepted connection fd {fd}");
            let conn = TcpConn::new(fd, self.ev_loop.clone());
            conn.set_owner(self.weak_self.clone());

            let cb = self.new_conn_cb.borrow().clone();
            if let Some(cb) = cb {
                cb(&conn);
            }

            // Register only after the callback had its chance to
            // install a close callback, so a registration failure
            // reaches it.
            TcpConn::register(&conn);

            // The callback (or a failed registration) may have closed
            // the connection already; only live connections enter the
            // registry.
            if !conn.is_removed() {
                self.conns.borrow_mut().insert(fd, conn);
            }
        }
    }

    /// Adds `fd` to the subscriber set; unknown descriptors are
    /// ignored so the set stays a subset of the registry.
    pub fn subscribe(&self, fd: RawFd) {
        if self.conns.borrow().contains_key(&fd) {
            self.subscribers.borrow_mut().insert(fd);
        }
    }

    pub fn unsubscribe(&self, fd: RawFd) {
        self.subscribers.borrow_mut().remove(&fd);
    }

    /// Sends `data` to every current subscriber.
    ///
    /// The subscriber set is snapshotted first, so a subscriber
    /// removing itself (or others) mid-broadcast is fine; entries
    /// gone from the registry by the time their turn comes are
    /// skipped. Returns `Ok` iff every send succeeded, otherwise the
    /// last error observed.
    pub fn broadcast(&self, data: &[u8]) -> Result<(), SendError> {
        let targets: Vec<RawFd> = self.subscribers.borrow().iter().copied().collect();

        let mut result = Ok(());
        for fd in targets {
            let conn = self.conns.borrow().get(&fd).cloned();
            let Some(conn) = conn else { continue };
            if let Err(e) = conn.send(data) {
                error!("broadcast to fd {fd} failed: {e}");
                result = Err(e);
            }
        }
        result
    }

    /// Ends a connection's tenure: drops it from the registry and
    /// the subscriber set. Called from the connection's removal
    /// protocol.
    pub(crate) fn forget(&self, fd: RawFd) {
        self.subscribers.borrow_mut().remove(&fd);
        self.conns.borrow_mut().remove(&fd);
    }

    /// Number of live connections (for diagnostics and tests).
    pub fn conn_count(&self) -> usize {
        self.conns.borrow().len()
    }
}

impl EventSink for TcpServer {
    fn on_ready(self: Rc<Self>, events: Ready) {
        self.handle_accept(events);
    }
}
