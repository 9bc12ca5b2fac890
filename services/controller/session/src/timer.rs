//! Shared periodic task scheduling.
//!
//! One [`Timer`] lives as long as the server and is cloned into every
//! session. Each scheduled task runs on its own tokio task driven by an
//! interval; cancelling it aborts that task. Tasks should only post work to
//! their owner's queue, never touch session state directly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct TimerInner {
    tasks: DashMap<u64, AbortHandle>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

/// Clonable handle to the shared scheduling facility
#[derive(Debug, Clone, Default)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `period`, first after one full period.
    ///
    /// The task keeps running until it returns `false`, the returned handle
    /// is cancelled, or the timer is shut down. Must be called from within a
    /// tokio runtime.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        name: &'static str,
        period: Duration,
        mut task: F,
    ) -> ScheduledTask
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));

        if self.inner.shut_down.load(Ordering::Acquire) {
            debug!("Timer shut down, not scheduling {}", name);
            cancelled.store(true, Ordering::Release);
            return ScheduledTask {
                id,
                name,
                cancelled,
                abort: None,
                timer: Weak::new(),
            };
        }

        let period = period.max(MIN_PERIOD);
        let inner = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !task() {
                    break;
                }
            }
            debug!("Periodic task {} finished", name);
            if let Some(inner) = inner.upgrade() {
                inner.tasks.remove(&id);
            }
        });

        let abort = handle.abort_handle();
        if !handle.is_finished() {
            self.inner.tasks.insert(id, abort.clone());
        }

        ScheduledTask {
            id,
            name,
            cancelled,
            abort: Some(abort),
            timer: Arc::downgrade(&self.inner),
        }
    }

    /// Number of tasks still scheduled
    pub fn active_tasks(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Cancel every outstanding task and refuse new ones
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let ids: Vec<u64> = self.inner.tasks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, abort)) = self.inner.tasks.remove(&id) {
                abort.abort();
            }
        }
        debug!("Timer shut down");
    }
}

/// Handle to one scheduled task
#[derive(Debug)]
pub struct ScheduledTask {
    id: u64,
    name: &'static str,
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
    timer: Weak<TimerInner>,
}

impl ScheduledTask {
    /// Stop the task. Returns false if it was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(abort) = &self.abort {
            abort.abort();
        }
        if let Some(inner) = self.timer.upgrade() {
            inner.tasks.remove(&self.id);
        }
        debug!("Cancelled periodic task {}", self.name);
        true
    }

    /// Whether [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Task name, for logging
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> bool + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
            true
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_runs_after_each_period() {
        let timer = Timer::new();
        let (count, task) = counter();
        let handle = timer.schedule_at_fixed_rate("count", Duration::from_secs(5), task);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(12)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(timer.active_tasks(), 1);

        assert!(handle.cancel());
        sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(timer.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let timer = Timer::new();
        let (_count, task) = counter();
        let handle = timer.schedule_at_fixed_rate("idle", Duration::from_secs(1), task);

        assert!(!handle.is_cancelled());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_when_it_returns_false() {
        let timer = Timer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let inner = runs.clone();
        let handle = timer.schedule_at_fixed_rate("twice", Duration::from_secs(1), move || {
            inner.fetch_add(1, Ordering::SeqCst) < 1
        });

        sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(timer.active_tasks(), 0);

        // Cancelling a finished task is harmless
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let timer = Timer::new();
        let (count, task) = counter();
        let _a = timer.schedule_at_fixed_rate("a", Duration::from_secs(1), task);
        let (_other, task) = counter();
        let _b = timer.schedule_at_fixed_rate("b", Duration::from_secs(2), task);
        assert_eq!(timer.active_tasks(), 2);

        timer.shutdown();
        assert_eq!(timer.active_tasks(), 0);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let (late, task) = counter();
        let handle = timer.schedule_at_fixed_rate("late", Duration::from_secs(1), task);
        assert!(handle.is_cancelled());
        sleep(Duration::from_secs(5)).await;
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }
}
