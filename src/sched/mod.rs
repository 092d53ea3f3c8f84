//! Cooperative stackless scheduling.
//!
//! Tasks are plain futures stepped from the event loop, one bounded
//! turn per loop iteration: a turn drains exactly the queue as it
//! stood at entry, so a task that re-enqueues itself (via
//! [`yield_now`]) cannot starve readiness processing.
//!
//! The scheduler for the current thread is installed when its
//! [`EventLoop`](crate::EventLoop) is created; [`spawn`],
//! [`yield_now`] and [`sleep`] operate on that thread-local context.

mod task;
mod timer;
mod yield_now;

pub use timer::{Sleep, sleep};
pub use yield_now::yield_now;

pub(crate) use timer::timer_run_once;

use task::Task;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::{Rc, Weak};

thread_local! {
    /// Scheduler of the event loop running on this thread. Held
    /// weakly so a dropped loop does not linger behind the cell.
    static CURRENT: RefCell<Option<Weak<Scheduler>>> = const { RefCell::new(None) };
}

/// FIFO queue of resumable tasks.
pub(crate) struct Scheduler {
    weak_self: Weak<Scheduler>,
    queue: RefCell<VecDeque<Rc<Task>>>,
}

impl Scheduler {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            queue: RefCell::new(VecDeque::new()),
        })
    }

    /// Installs this scheduler as the thread's current one.
    pub(crate) fn install(&self) {
        CURRENT.with(|cell| {
            *cell.borrow_mut() = Some(self.weak_self.clone());
        });
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let task = Rc::new(Task::new(future, self.weak_self.clone()));
        task.mark_queued();
        self.queue.borrow_mut().push_back(task);
    }

    pub(crate) fn enqueue(&self, task: Rc<Task>) {
        self.queue.borrow_mut().push_back(task);
    }

    /// Steps exactly the tasks that were ready at entry.
    ///
    /// Tasks woken during the turn (yields, timer expiries, I/O
    /// progress) land behind the captured prefix and wait for the
    /// next turn.
    pub(crate) fn run_once(&self) {
        let ready = self.queue.borrow().len();
        for _ in 0..ready {
            let task = self.queue.borrow_mut().pop_front();
            let Some(task) = task else { break };
            task.step();
        }
    }
}

/// Spawns a future onto the scheduler of this thread's event loop.
///
/// # Panics
///
/// Panics if no event loop has been created on this thread.
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    let scheduler = CURRENT.with(|cell| {
        cell.borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("spawn requires a live event loop on this thread")
    });
    scheduler.spawn(future);
}
