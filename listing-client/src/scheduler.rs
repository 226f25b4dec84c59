use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use futures::future::BoxFuture;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Unit of work run on every tick of a repeating schedule.
/// Returning `Break` ends the schedule.
pub type RepeatingTask = Arc<dyn Fn() -> BoxFuture<'static, ControlFlow<()>> + Send + Sync>;

/// Runs work at a fixed repeating interval.
pub trait Scheduler: Send + Sync {
    /// First run after `delay`, then every `interval`. A zero `interval`
    /// schedules nothing and yields an already cancelled handle.
    fn schedule_repeating(
        &self,
        delay: Duration,
        interval: Duration,
        task: RepeatingTask,
    ) -> ScheduleHandle;
}

/// Token for a pending repeating schedule. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    token: CancellationToken,
}

impl ScheduleHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Scheduler backed by tokio tasks.
///
/// Every handle is a child of the scheduler's root token, so cancelling the
/// root cancels all scheduled work at once.
pub struct TokioScheduler {
    root: CancellationToken,
}

impl TokioScheduler {
    pub fn new(root: CancellationToken) -> Self {
        Self { root }
    }

    /// Cancel every schedule created by this scheduler.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(
        &self,
        delay: Duration,
        interval: Duration,
        task: RepeatingTask,
    ) -> ScheduleHandle {
        let token = self.root.child_token();
        if interval.is_zero() {
            tracing::warn!("Refusing to schedule a repeating task with a zero interval");
            token.cancel();
            return ScheduleHandle::new(token);
        }

        let cancel = token.clone();
        let start = tokio::time::Instant::now() + delay;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, interval);
            // A tick that lands while the task is still running is dropped, never replayed
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if cancel.is_cancelled() {
                    break;
                }
                // Cancellation stops the next tick but never preempts a running one
                if task().await.is_break() {
                    cancel.cancel();
                    break;
                }
            }

            tracing::debug!("Repeating schedule stopped");
        });

        ScheduleHandle::new(token)
    }
}
