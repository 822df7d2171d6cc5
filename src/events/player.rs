use crate::{input::PlaybackSource, player::PlayError};
use std::time::Duration;

/// Status updates from an [`AudioPlayer`], for rendering by the application.
///
/// [`AudioPlayer`]: crate::player::AudioPlayer
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum PlayerEvent {
    /// A source began (or resumed) transmitting.
    Playing(PlaybackSource),
    /// Playback was held by `pause`, or while rejoining.
    Paused,
    /// The player returned to waiting without finishing a source, e.g. after `stop`.
    Idle,
    /// A source finished.
    ///
    /// `position` is how far into the source playback reached, including
    /// any seek offset, which callers may use to loop or advance a queue.
    Ended {
        /// Final playback position.
        position: Duration,
    },
    /// A playback attempt failed.
    ///
    /// Only [`PlayError::is_fatal`] errors leave the player unusable.
    Error(PlayError),
}
