//! Timed one-shot task with cancel-and-wait

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A delayed piece of work that can be cancelled synchronously
///
/// At most one body is pending at a time. Once [`DeferredTask::close`] has
/// been called no new body can be scheduled.
pub struct DeferredTask {
    name: &'static str,
    runtime: Handle,
    slot: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl DeferredTask {
    pub fn new(name: &'static str, runtime: Handle) -> Self {
        Self {
            name,
            runtime,
            slot: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Schedule `work` to run after `delay`
    ///
    /// Returns `false` without scheduling if a body is already pending or the
    /// task is closed. Never blocks.
    pub fn schedule<F>(&self, delay: Duration, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            debug!("{}: closed, not scheduling", self.name);
            return false;
        }

        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("{}: already pending", self.name);
            return false;
        }

        *slot = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            work();
        }));
        true
    }

    /// Whether a body is scheduled or running
    pub fn is_pending(&self) -> bool {
        self.slot.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the pending body and wait until it has either finished or will never run
    ///
    /// Returns `true` if a body was prevented from running.
    pub async fn cancel_sync(&self) -> bool {
        let handle = self.slot.lock().take();
        let Some(handle) = handle else {
            return false;
        };

        handle.abort();
        match handle.await {
            Ok(()) => false,
            Err(e) if e.is_cancelled() => {
                debug!("{}: cancelled before running", self.name);
                true
            }
            Err(e) => {
                warn!("{}: task failed: {}", self.name, e);
                false
            }
        }
    }

    /// Refuse further scheduling, then cancel and wait
    pub async fn close(&self) -> bool {
        self.closed.store(true, Ordering::Release);
        self.cancel_sync().await
    }

    /// Abort without waiting, for use where awaiting is impossible
    pub fn abort(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.slot.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counter_task(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let c = counter.clone();
        move || {
            c.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_delay() {
        let task = DeferredTask::new("test", Handle::current());
        let count = Arc::new(AtomicUsize::new(0));

        assert!(task.schedule(Duration::from_millis(20), counter_task(&count)));
        assert!(task.is_pending());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_schedule_while_pending_is_ignored() {
        let task = DeferredTask::new("test", Handle::current());
        let count = Arc::new(AtomicUsize::new(0));

        assert!(task.schedule(Duration::from_millis(20), counter_task(&count)));
        assert!(!task.schedule(Duration::from_millis(20), counter_task(&count)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Finished, so it can be scheduled again
        assert!(task.schedule(Duration::from_millis(20), counter_task(&count)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_sync_prevents_body() {
        let task = DeferredTask::new("test", Handle::current());
        let count = Arc::new(AtomicUsize::new(0));

        task.schedule(Duration::from_millis(20), counter_task(&count));
        assert!(task.cancel_sync().await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!task.cancel_sync().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_refuses_new_work() {
        let task = DeferredTask::new("test", Handle::current());
        let count = Arc::new(AtomicUsize::new(0));

        task.close().await;
        assert!(!task.schedule(Duration::from_millis(1), counter_task(&count)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
