//! # Rivulet
//!
//! **Rivulet** is a single-threaded, reactor-style TCP networking
//! core for Linux. One [`EventLoop`] owns an epoll instance and
//! drives everything on its thread: readiness dispatch to registered
//! connections, a bounded cooperative-scheduler turn, and a
//! timed-wakeup turn — in that order, every iteration.
//!
//! Connections are buffered and non-blocking. Incoming bytes are
//! drained into a [`MessageBuffer`] and handed to a read callback;
//! outgoing bytes take one direct send and queue the remainder under
//! writable readiness, with explicit back-pressure
//! ([`SendError::WouldOverflow`]) when the queue is full. Cooperative
//! tasks are plain futures stepped between readiness batches; they
//! can [`sched::yield_now`], [`sched::sleep`] on the timed scheduler,
//! or suspend inside [`TcpConn::send_async`] until buffer space
//! frees up.
//!
//! A minimal publish/subscribe layer rides on the server's
//! connection registry: connections subscribe themselves and
//! [`TcpServer::broadcast`] fans a payload out to every subscriber.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rivulet::{EventLoop, TcpServer};
//!
//! let ev_loop = EventLoop::new().unwrap();
//! let server = TcpServer::new(ev_loop.clone()).unwrap();
//!
//! server
//!     .start(9000, |conn| {
//!         let fd = conn.fd();
//!         conn.set_close_callback(move |_| println!("fd {fd} closed"));
//!         conn.set_read_callback(|conn| {
//!             let msg = conn.read_all();
//!             let _ = conn.send(&msg);
//!             0
//!         });
//!     })
//!     .unwrap();
//!
//! ev_loop.run();
//! ```
//!
//! ## Threading
//!
//! The core is cooperative and single-threaded by design: no locks,
//! no atomics, and none of the handles are `Send`. Everything that
//! touches a loop must run on the thread that created it.

mod buffer;
mod conn;
mod connector;
mod event;
mod event_loop;
mod server;
mod socket;
mod stream;
mod sys;

pub mod sched;

pub use buffer::{DEFAULT_CAPACITY, MessageBuffer};
pub use conn::TcpConn;
pub use connector::TcpConnector;
pub use event::Ready;
pub use event_loop::{EventLoop, EventSink};
pub use server::{ServerError, TcpServer};
pub use socket::TcpSocket;
pub use stream::SendError;
