use std::error::Error as StdError;

/// Error returned by a failing [`ScheduledTask::execute`].
pub type TaskError = Box<dyn StdError + Send + Sync>;

/// Work run once per tick by a [`Scheduler`].
///
/// [`Scheduler`]: super::Scheduler
pub trait ScheduledTask: Send + Sync {
    /// Decides whether this task still wants to run.
    ///
    /// Returning `false` removes the task from the scheduler before it is
    /// executed. Defaults to `true`.
    fn filter(&self) -> bool {
        true
    }

    /// Runs one tick's worth of work.
    ///
    /// An error removes this task from the scheduler. Other tasks are unaffected.
    fn execute(&self) -> Result<(), TaskError>;
}

/// Handle to one insertion of a task into a [`Scheduler`].
///
/// Identifiers are never reused by the scheduler which issued them.
///
/// [`Scheduler`]: super::Scheduler
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new() -> Self {
        TaskId(0)
    }

    pub(crate) fn incr(&mut self) -> Self {
        let out = *self;
        self.0 = self.0.wrapping_add(1);
        out
    }
}
