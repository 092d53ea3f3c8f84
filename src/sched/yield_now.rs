use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A future that yields execution back to the scheduler exactly once.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.0 {
            self.0 = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }

        Poll::Ready(())
    }
}

/// Yields the current task back to the scheduler for one turn.
///
/// The task is re-enqueued immediately but, because a turn is bounded
/// by the queue length at entry, it resumes no earlier than the next
/// cooperative turn.
pub async fn yield_now() {
    YieldOnce(false).await
}
