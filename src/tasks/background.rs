//! Deferred Execution
//!
//! `WaitUntil` is the host contract: accept a future and let it finish even
//! after the request that produced it has completed. `BackgroundTasks` is
//! the tokio implementation; the host calls [`BackgroundTasks::drain`]
//! before shutting down.
//!
//! Tasks are detached on spawn. Dropping or timing out a `drain` call never
//! cancels them, and any number of callers may drain concurrently.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, warn};

// == Wait Until ==
/// Scheduler for detached work.
pub trait WaitUntil: Send + Sync {
    fn wait_until(&self, task: BoxFuture<'static, ()>);
}

#[derive(Debug, Default)]
struct InFlight {
    pending: AtomicUsize,
    idle: Notify,
}

/// Counts one task as in flight until dropped, including on panic or abort.
struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn new(in_flight: Arc<InFlight>) -> Self {
        in_flight.pending.fetch_add(1, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// == Background Tasks ==
/// Tracks detached tokio tasks so they can be drained on shutdown.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    in_flight: Arc<InFlight>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks spawned and not yet finished.
    pub fn pending(&self) -> usize {
        self.in_flight.pending.load(Ordering::SeqCst)
    }

    // == Drain ==
    /// Waits until every pending task, including tasks spawned while
    /// draining, has finished.
    pub async fn drain(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            // Register before reading the count so a final notify is not missed.
            idle.as_mut().enable();

            let pending = self.pending();
            if pending == 0 {
                return;
            }
            debug!(pending, "draining background tasks");
            idle.await;
        }
    }
}

impl WaitUntil for BackgroundTasks {
    /// Must be called from within a tokio runtime.
    fn wait_until(&self, task: BoxFuture<'static, ()>) {
        let guard = InFlightGuard::new(self.in_flight.clone());
        tokio::spawn(async move {
            let _guard = guard;
            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                warn!("background task panicked");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_pending_work() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = done.clone();
            tasks.wait_until(
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            );
        }

        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_drain_includes_tasks_spawned_while_draining() {
        let tasks = Arc::new(BackgroundTasks::new());
        let done = Arc::new(AtomicUsize::new(0));

        let inner_tasks = tasks.clone();
        let inner_done = done.clone();
        tasks.wait_until(
            async move {
                inner_tasks.wait_until(
                    async move {
                        inner_done.fetch_add(1, Ordering::SeqCst);
                    }
                    .boxed(),
                );
            }
            .boxed(),
        );

        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_break_drain() {
        let tasks = BackgroundTasks::new();
        tasks.wait_until(async { panic!("origin exploded"); }.boxed());
        tasks.drain().await;
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_drains_both_wait_for_work() {
        let tasks = Arc::new(BackgroundTasks::new());
        let done = Arc::new(AtomicUsize::new(0));

        let flag = done.clone();
        tasks.wait_until(
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        );

        let first = tokio::spawn({
            let tasks = tasks.clone();
            async move { tasks.drain().await }
        });
        tokio::task::yield_now().await;

        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_drain_leaves_work_running() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        let flag = done.clone();
        tasks.wait_until(
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        );

        let drained = tokio::time::timeout(Duration::from_millis(10), tasks.drain()).await;
        assert!(drained.is_err());
        assert_eq!(tasks.pending(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_pending() {
        BackgroundTasks::new().drain().await;
    }
}
