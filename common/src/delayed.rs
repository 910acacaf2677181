//! A unit of work that runs once after a fixed delay and can be cancelled
//! or rescheduled.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs a bound action after `delay`.
///
/// At most one run is in flight per instance: [`schedule`](Self::schedule)
/// is a no-op while a run is pending or executing, and
/// [`cancel`](Self::cancel) does not return until the cancelled run has
/// stopped.
pub struct DelayedTask {
    delay: Duration,
    action: Action,
    task: Option<JoinHandle<()>>,
}

impl DelayedTask {
    pub fn new<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            delay,
            action: Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(action()) }),
            task: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// True while a run is waiting for its delay or still executing.
    pub fn is_pending(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Schedule or cancel depending on `scheduled`.
    pub async fn set(&mut self, scheduled: bool) {
        if scheduled {
            self.schedule();
        } else {
            self.cancel().await;
        }
    }

    /// Start a fresh timer unless a run is already pending.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self) {
        if self.is_pending() {
            return;
        }

        let delay = self.delay;
        let run = (self.action)();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run.await;
        }));
    }

    pub async fn reschedule(&mut self) {
        self.cancel().await;
        self.schedule();
    }

    /// Stop a pending run and wait until it has stopped. Safe to call when
    /// nothing is pending.
    pub async fn cancel(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        if task.is_finished() {
            return;
        }

        task.abort();
        if let Err(e) = task.await {
            if e.is_panic() {
                error!("Delayed task panicked: {}", e);
            }
        }
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counting_task(delay_secs: u64) -> (DelayedTask, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = DelayedTask::new(Duration::from_secs(delay_secs), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (task, runs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_after_delay() {
        let (mut task, runs) = counting_task(5);
        task.schedule();

        sleep(Duration::from_millis(4900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(task.is_pending());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_while_pending_is_noop() {
        let (mut task, runs) = counting_task(2);
        task.schedule();
        sleep(Duration::from_secs(1)).await;
        task.schedule();

        // The first timer still fires at t=2, and only once.
        sleep(Duration::from_millis(1100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let (mut task, runs) = counting_task(1);
        task.schedule();
        task.cancel().await;
        assert!(!task.is_pending());

        sleep(Duration::from_secs(3)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // Nothing pending: still fine.
        task.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_restarts_timer() {
        let (mut task, runs) = counting_task(5);
        task.schedule();
        sleep(Duration::from_secs(4)).await;
        task.reschedule().await;

        sleep(Duration::from_secs(4)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        sleep(Duration::from_millis(1100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waits_for_running_action() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        let mut task = DelayedTask::new(Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                sleep(Duration::from_secs(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        task.schedule();
        sleep(Duration::from_secs(2)).await;
        assert!(task.is_pending());

        task.cancel().await;
        assert!(!task.is_pending());
        sleep(Duration::from_secs(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_toggles() {
        let (mut task, runs) = counting_task(1);
        task.set(true).await;
        assert!(task.is_pending());
        task.set(false).await;
        assert!(!task.is_pending());

        task.set(true).await;
        sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
