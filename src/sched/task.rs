//! Task container and waker for the cooperative scheduler.

use super::Scheduler;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, RawWaker, RawWakerVTable, Waker};

/// A spawned cooperative task.
///
/// The future is held until it completes; `queued` guards against the
/// same task sitting in the ready queue twice. A task whose future
/// slot is empty has finished (or was cancelled) and any late wake is
/// ignored.
pub(crate) struct Task {
    /// The suspended future; `None` once it has run to completion.
    future: RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>,

    /// Whether the task currently sits in the ready queue.
    queued: Cell<bool>,

    /// The scheduler that resumes this task. Weak so a task woken
    /// after its loop is gone simply does nothing.
    scheduler: Weak<Scheduler>,
}

impl Task {
    pub(crate) fn new<F>(future: F, scheduler: Weak<Scheduler>) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        Self {
            future: RefCell::new(Some(Box::pin(future))),
            queued: Cell::new(false),
            scheduler,
        }
    }

    pub(crate) fn mark_queued(&self) {
        self.queued.set(true);
    }

    /// Re-enqueues this task unless it is already pending a turn.
    pub(crate) fn wake(self: Rc<Self>) {
        if self.queued.replace(true) {
            return;
        }
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.enqueue(self);
        }
    }

    /// Steps the task once.
    ///
    /// The future is moved out for the duration of the poll so a wake
    /// fired from inside the poll (e.g. a yield) only re-enqueues the
    /// task; the restored future is in place before that entry is
    /// popped on a later turn.
    pub(crate) fn step(self: Rc<Self>) {
        self.queued.set(false);

        let Some(mut future) = self.future.borrow_mut().take() else {
            return;
        };

        let waker = make_waker(self.clone());
        let mut cx = Context::from_waker(&waker);

        if future.as_mut().poll(&mut cx).is_pending() {
            *self.future.borrow_mut() = Some(future);
        }
    }
}

/// Builds a [`Waker`] backed by an `Rc<Task>`.
///
/// The core is single-threaded by contract; these wakers must never
/// leave the loop thread. None of them are exposed outside the crate.
pub(crate) fn make_waker(task: Rc<Task>) -> Waker {
    unsafe { Waker::from_raw(RawWaker::new(Rc::into_raw(task) as *const (), &VTABLE)) }
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

fn clone_raw(ptr: *const ()) -> RawWaker {
    let rc = unsafe { Rc::<Task>::from_raw(ptr as *const Task) };
    let cloned = rc.clone();
    mem::forget(rc);
    RawWaker::new(Rc::into_raw(cloned) as *const (), &VTABLE)
}

fn wake_raw(ptr: *const ()) {
    let rc = unsafe { Rc::<Task>::from_raw(ptr as *const Task) };
    rc.wake();
}

fn wake_by_ref_raw(ptr: *const ()) {
    let rc = unsafe { Rc::<Task>::from_raw(ptr as *const Task) };
    rc.clone().wake();
    mem::forget(rc);
}

fn drop_raw(ptr: *const ()) {
    unsafe { drop(Rc::<Task>::from_raw(ptr as *const Task)) };
}
