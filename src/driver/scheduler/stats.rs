use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics shared by an entire [`Scheduler`].
///
/// [`Scheduler`]: super::Scheduler
#[derive(Debug, Default)]
pub struct StatBlock {
    ticks: AtomicU64,
    live: AtomicU64,
    errored: AtomicU64,
}

impl StatBlock {
    /// Returns the number of ticks run since the scheduler was created.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Returns the number of tasks currently scheduled.
    #[inline]
    pub fn live_tasks(&self) -> u64 {
        self.live.load(Ordering::Relaxed)
    }

    /// Returns the number of tasks removed because their `execute` failed.
    #[inline]
    pub fn errored_tasks(&self) -> u64 {
        self.errored.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_task(&self) {
        self.live.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn remove_task(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn task_errored(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
    }
}
