/// Playback state of an [`AudioPlayer`].
///
/// [`AudioPlayer`]: super::AudioPlayer
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum PlayerState {
    /// Nothing is playing. New sources may be started.
    #[default]
    Wait,
    /// A source is sending one frame per tick.
    Playing,
    /// A source is held, and sends nothing until resumed.
    Pause,
    /// The player failed fatally; only `stop` leaves this state.
    Error,
}

impl PlayerState {
    /// Returns whether a source is loaded, paused or not.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Pause)
    }
}
