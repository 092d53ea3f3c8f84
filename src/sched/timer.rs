//! Timed wake-ups for cooperative tasks.
//!
//! One timed scheduler exists per loop thread. Each event-loop turn
//! calls [`timer_run_once`], which pops every entry whose deadline has
//! passed and wakes it; the woken task re-enters the cooperative
//! ready queue and resumes on the following turn.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

thread_local! {
    static TIMER: RefCell<TimedScheduler> = RefCell::new(TimedScheduler::new());
}

/// An entry in the timed-wakeup heap.
struct TimerEntry {
    deadline: Instant,

    /// Insertion counter; equal deadlines fire in insertion order.
    seq: u64,

    waker: Waker,

    /// Cancellation flag shared with the sleep future.
    cancelled: Rc<Cell<bool>>,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Reversed so `BinaryHeap` behaves as a min-heap: the earliest
    /// deadline (then the earliest insertion) pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deadline-ordered collection of pending wake-ups.
struct TimedScheduler {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimedScheduler {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn schedule(&mut self, deadline: Instant, waker: Waker, cancelled: Rc<Cell<bool>>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            waker,
            cancelled,
        });
    }

    fn run_once(&mut self) {
        let now = Instant::now();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry present");
            if !entry.cancelled.get() {
                entry.waker.wake();
            }
        }
    }
}

/// Pops and wakes every due entry. Called once per loop iteration.
pub(crate) fn timer_run_once() {
    TIMER.with(|timer| timer.borrow_mut().run_once());
}

/// Creates a future that completes once `duration` has elapsed.
///
/// Deadlines are checked once per event-loop iteration, so the actual
/// wake-up lags the deadline by up to one readiness wait (100 ms).
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        deadline: Instant::now() + duration,
        registered: false,
        cancelled: Rc::new(Cell::new(false)),
    }
}

/// Future returned by [`sleep`].
///
/// The timer entry is registered on first poll; dropping the future
/// before completion cancels the entry so no spurious wake occurs.
pub struct Sleep {
    deadline: Instant,
    registered: bool,
    cancelled: Rc<Cell<bool>>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.cancelled.get() || Instant::now() >= this.deadline {
            return Poll::Ready(());
        }

        if !this.registered {
            this.registered = true;
            TIMER.with(|timer| {
                timer
                    .borrow_mut()
                    .schedule(this.deadline, cx.waker().clone(), this.cancelled.clone());
            });
        }

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.cancelled.set(true);
    }
}
