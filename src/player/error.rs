use crate::{driver::connection::error::Error as ConnectionError, input::AudioStreamError};
use std::{error::Error, fmt, sync::Arc};

/// Errors raised while starting or running playback.
///
/// Every kind except [`PlayError::RejoinExhausted`] only affects the current
/// source: the application is expected to skip to its next track.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum PlayError {
    /// The source descriptor could not be resolved to a playable location.
    Resolve(Arc<AudioStreamError>),
    /// The decoder could not be started, or failed before its first frame.
    Create(Arc<AudioStreamError>),
    /// The decoder produced no frame within the configured readable timeout.
    Timeout,
    /// The decoder failed while playing.
    Stream(Arc<AudioStreamError>),
    /// A later `play`, `stop`, or `seek` replaced this request.
    Superseded,
    /// There is no current source to operate on.
    NothingPlaying,
    /// The player has failed fatally, and must be stopped before reuse.
    Unusable,
    /// The connection could not be rejoined after a name resolution failure.
    ///
    /// Carries the last rejoin error. The application must recreate the session.
    RejoinExhausted(Arc<ConnectionError>),
}

impl PlayError {
    /// Returns whether this error leaves the player in [`PlayerState::Error`].
    ///
    /// [`PlayerState::Error`]: super::PlayerState::Error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RejoinExhausted(_))
    }
}

impl fmt::Display for PlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "playback failed: ")?;
        match self {
            Self::Resolve(e) => write!(f, "could not resolve source ({e})"),
            Self::Create(e) => write!(f, "could not start decoder ({e})"),
            Self::Timeout => write!(f, "decoder produced no audio in time"),
            Self::Stream(e) => write!(f, "decoder failed mid-stream ({e})"),
            Self::Superseded => write!(f, "request was superseded"),
            Self::NothingPlaying => write!(f, "nothing is playing"),
            Self::Unusable => write!(f, "player has failed and must be stopped"),
            Self::RejoinExhausted(e) => write!(f, "could not rejoin voice ({e})"),
        }
    }
}

impl Error for PlayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Resolve(e) | Self::Create(e) | Self::Stream(e) => Some(e.as_ref()),
            Self::RejoinExhausted(e) => Some(e.as_ref()),
            Self::Timeout | Self::Superseded | Self::NothingPlaying | Self::Unusable => None,
        }
    }
}

/// Convenience type for player operations.
pub type Result<T> = std::result::Result<T, PlayError>;
