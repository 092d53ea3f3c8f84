//! The epoll-driven event loop.
//!
//! One loop per thread drives the whole core: wait for readiness,
//! dispatch each ready descriptor to its registered sink, then give
//! the cooperative scheduler and the timed scheduler one turn each.
//!
//! Registration stores a type-erased [`EventSink`] keyed by the
//! descriptor; the descriptor itself rides in the epoll user-data
//! slot as the token. The dispatcher resolves tokens through the
//! registry and never learns concrete handler types.

use crate::event::Ready;
use crate::sched::{self, Scheduler};
use crate::sys;

use libc::{EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, epoll_create1, epoll_ctl, epoll_event, epoll_wait};
use log::{debug, error};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::ptr;
use std::rc::{Rc, Weak};

/// Upper bound on events drained per wait.
const MAX_EVENTS: usize = 1 << 10;

/// Wait timeout; also bounds how long [`EventLoop::stop`] takes to
/// become effective.
const WAIT_TIMEOUT_MS: libc::c_int = 100;

/// A registered readiness handler.
///
/// The `Rc<Self>` receiver hands the sink a temporary ownership share
/// for the duration of the dispatch, so user code running inside the
/// callback may close and deregister the object without destroying it
/// mid-handler.
pub trait EventSink {
    fn on_ready(self: Rc<Self>, events: Ready);
}

/// A single-threaded epoll event loop.
pub struct EventLoop {
    epoll: RawFd,
    handlers: RefCell<HashMap<RawFd, Weak<dyn EventSink>>>,
    scheduler: Rc<Scheduler>,
    running: Cell<bool>,
}

impl EventLoop {
    /// Creates the loop and installs its scheduler as the thread's
    /// current one, enabling [`sched::spawn`] and friends.
    pub fn new() -> io::Result<Rc<Self>> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let scheduler = Scheduler::new();
        scheduler.install();

        Ok(Rc::new(Self {
            epoll,
            handlers: RefCell::new(HashMap::new()),
            scheduler,
            running: Cell::new(false),
        }))
    }

    /// Registers `fd` for `ready` events, dispatching to `sink`.
    pub fn add(&self, fd: RawFd, ready: Ready, sink: Weak<dyn EventSink>) -> io::Result<()> {
        let mut ev = epoll_event {
            events: ready.to_epoll(),
            u64: fd as u64,
        };
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            error!("epoll_ctl ADD failed for fd {fd}: {err}");
            return Err(err);
        }
        self.handlers.borrow_mut().insert(fd, sink);
        Ok(())
    }

    /// Re-programs the readiness mask of an already registered fd.
    pub fn modify(&self, fd: RawFd, ready: Ready) -> io::Result<()> {
        let mut ev = epoll_event {
            events: ready.to_epoll(),
            u64: fd as u64,
        };
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut ev) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            error!("epoll_ctl MOD failed for fd {fd}: {err}");
            return Err(err);
        }
        Ok(())
    }

    /// Deregisters `fd`. The registry entry is dropped even if the
    /// kernel call fails (the descriptor may already be closed).
    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        self.handlers.borrow_mut().remove(&fd);
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, ptr::null_mut()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            error!("epoll_ctl DEL failed for fd {fd}: {err}");
            return Err(err);
        }
        Ok(())
    }

    /// Runs the loop until [`stop`](Self::stop) is called.
    ///
    /// Each iteration waits up to 100 ms for up to 1024 events,
    /// dispatches them in kernel order, then runs one cooperative
    /// turn and one timer turn. A wait interrupted by a signal is not
    /// an error; other wait failures are logged and the loop keeps
    /// going.
    pub fn run(&self) {
        self.running.set(true);

        let mut events: Vec<epoll_event> = Vec::with_capacity(MAX_EVENTS);

        while self.running.get() {
            let n = unsafe {
                epoll_wait(
                    self.epoll,
                    events.as_mut_ptr(),
                    MAX_EVENTS as libc::c_int,
                    WAIT_TIMEOUT_MS,
                )
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("epoll_wait failed: {err}");
                continue;
            }

            unsafe { events.set_len(n as usize) };

            for ev in &events {
                let fd = ev.u64 as RawFd;
                let sink = self
                    .handlers
                    .borrow()
                    .get(&fd)
                    .and_then(Weak::upgrade);
                match sink {
                    Some(sink) => sink.on_ready(Ready::from_epoll(ev.events)),
                    None => {
                        // Handler gone without deregistering; drop the
                        // stale entry.
                        debug!("no live handler for fd {fd}");
                        self.handlers.borrow_mut().remove(&fd);
                    }
                }
            }

            self.scheduler.run_once();
            sched::timer_run_once();
        }
    }

    /// Requests the loop to exit; effective within one wait timeout.
    pub fn stop(&self) {
        self.running.set(false);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
        let _ = sys::sys_close(self.epoll);
    }
}
