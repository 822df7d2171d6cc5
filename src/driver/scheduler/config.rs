use crate::constants::TIMESTEP_LENGTH;
use std::time::Duration;

/// Configuration for how a [`Scheduler`] runs its tasks.
///
/// [`Scheduler`]: super::Scheduler
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
    /// Time between two consecutive ticks.
    ///
    /// Defaults to 20ms, the length of one Opus frame.
    pub tick_length: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_length: TIMESTEP_LENGTH,
        }
    }
}

impl Config {
    /// Sets the time between two consecutive ticks.
    ///
    /// Zero-length ticks are raised to one millisecond.
    #[must_use]
    pub fn tick_length(mut self, tick_length: Duration) -> Self {
        self.tick_length = tick_length.max(Duration::from_millis(1));
        self
    }
}
