//! A shared fixed-interval tick loop for paced audio work.
//!
//! Every tick, each scheduled task is first asked whether it still wants to
//! run, and is then executed. Tasks run one after another in insertion order,
//! so a single loop serves any number of players without a thread per player.
//!
//! The loop is only alive while tasks are scheduled: it stops once the task set
//! empties, and is restarted by the next insertion.

mod config;
mod stats;
mod task;

pub use config::Config;
pub use stats::StatBlock;
pub use task::*;

use parking_lot::{Mutex, ReentrantMutex};
use std::{cell::Cell, sync::Arc};
use tokio::{
    spawn,
    time::{sleep_until, Instant},
};
use tracing::{debug, instrument, trace, warn};
use tracing_futures::Instrument;

/// A reference to a shared tick loop.
///
/// Clones refer to the same loop and task set.
#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    inner: Arc<InnerScheduler>,
}

#[derive(Debug, Default)]
struct InnerScheduler {
    config: Config,
    tasks: Mutex<TaskSet>,
    stats: StatBlock,
}

#[derive(Default)]
struct TaskSet {
    entries: Vec<Arc<Entry>>,
    next_id: TaskId,
    running: bool,
}

/// A scheduled task, and whether it has been removed.
///
/// The flag's lock is held across each `filter` and `execute` call, so a
/// removal from another thread waits out any run in progress. It is reentrant
/// so that a running task may remove itself.
struct Entry {
    id: TaskId,
    task: Arc<dyn ScheduledTask>,
    live: ReentrantMutex<Cell<bool>>,
}

impl std::fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSet")
            .field("entries", &self.entries.len())
            .field("next_id", &self.next_id)
            .field("running", &self.running)
            .finish()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a new, idle scheduler.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(InnerScheduler {
                config,
                tasks: Mutex::default(),
                stats: StatBlock::default(),
            }),
        }
    }

    /// Adds a task to run from the next tick onward, starting the loop if needed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn insert(&self, task: Arc<dyn ScheduledTask>) -> TaskId {
        let mut tasks = self.inner.tasks.lock();
        let id = tasks.next_id.incr();
        tasks.entries.push(Arc::new(Entry {
            id,
            task,
            live: ReentrantMutex::new(Cell::new(true)),
        }));
        self.inner.stats.add_task();

        if !tasks.running {
            tasks.running = true;
            debug!("Starting scheduler loop.");
            spawn(run(self.inner.clone()).in_current_span());
        }

        id
    }

    /// Removes a task, returning whether it was scheduled.
    ///
    /// Once this returns, the task will not be executed again. If the task is
    /// running on another thread, this blocks until that run completes, so
    /// callers must not hold any lock the task's `filter` or `execute` takes.
    pub fn remove(&self, id: TaskId) -> bool {
        self.inner.remove(id)
    }

    /// Returns whether a task is still scheduled.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.inner.tasks.lock().entries.iter().any(|e| e.id == id)
    }

    /// Returns the number of scheduled tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().entries.len()
    }

    /// Returns whether no tasks are scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the tick loop is currently alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.tasks.lock().running
    }

    /// Returns this scheduler's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns statistics about this scheduler's work.
    #[must_use]
    pub fn stats(&self) -> &StatBlock {
        &self.inner.stats
    }
}

impl InnerScheduler {
    fn remove(&self, id: TaskId) -> bool {
        let Some(entry) = self.find(id) else {
            return false;
        };

        // Lock order is always entry, then task set.
        let live = entry.live.lock();
        if !live.replace(false) {
            return false;
        }

        self.tasks.lock().entries.retain(|e| e.id != id);
        self.stats.remove_task();
        true
    }

    fn find(&self, id: TaskId) -> Option<Arc<Entry>> {
        self.tasks
            .lock()
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Marks the loop as stopped if no work remains.
    fn try_stop(&self) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.entries.is_empty() {
            tasks.running = false;
            true
        } else {
            false
        }
    }

    fn tick(&self) {
        self.stats.tick();

        let entries = self.tasks.lock().entries.clone();

        for entry in entries {
            let id = entry.id;
            let live = entry.live.lock();

            // Tasks removed earlier in this tick must not run.
            if !live.get() {
                continue;
            }

            if !entry.task.filter() {
                trace!("Task {id:?} went idle.");
                self.remove(id);
                continue;
            }

            if let Err(e) = entry.task.execute() {
                warn!("Removing task {id:?} after error: {e}.");
                if self.remove(id) {
                    self.stats.task_errored();
                }
            }
        }
    }
}

#[instrument(skip(inner))]
async fn run(inner: Arc<InnerScheduler>) {
    let tick = inner.config.tick_length;
    let mut target = Instant::now() + tick;

    loop {
        sleep_until(target).await;

        if inner.try_stop() {
            break;
        }

        inner.tick();

        if inner.try_stop() {
            break;
        }

        target += tick;
    }

    debug!("Scheduler loop stopped.");
}
