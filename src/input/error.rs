use std::{error::Error, fmt::Display, io::Error as IoError};
use symphonia::core::errors::Error as SymphError;

/// Errors encountered when resolving a [`PlaybackSource`] or running its
/// transcoder.
///
/// [`PlaybackSource`]: super::PlaybackSource
#[non_exhaustive]
#[derive(Debug)]
pub enum AudioStreamError {
    /// The decoder process (or its reader thread) could not be started.
    Spawn(IoError),
    /// The decoder process did not expose an output pipe.
    Stdout,
    /// The decoder's output could not be probed or demultiplexed.
    Demux(SymphError),
    /// The decoder finished before producing a single frame.
    EndedBeforeReadable,
    /// The operation failed for an application-defined reason.
    Fail(Box<dyn Error + Send + Sync>),
}

impl Display for AudioStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to create audio -- ")?;
        match self {
            Self::Spawn(e) => write!(f, "could not start decoder: {e}"),
            Self::Stdout => f.write_str("decoder has no output pipe"),
            Self::Demux(e) => write!(f, "bad decoder output: {e}"),
            Self::EndedBeforeReadable => f.write_str("decoder ended before producing audio"),
            Self::Fail(why) => write!(f, "{why}"),
        }
    }
}

impl Error for AudioStreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            Self::Demux(e) => Some(e),
            Self::Fail(e) => Some(&**e),
            Self::Stdout | Self::EndedBeforeReadable => None,
        }
    }
}

impl From<IoError> for AudioStreamError {
    fn from(e: IoError) -> Self {
        Self::Spawn(e)
    }
}

impl From<SymphError> for AudioStreamError {
    fn from(e: SymphError) -> Self {
        Self::Demux(e)
    }
}

impl From<Box<dyn Error + Send + Sync>> for AudioStreamError {
    fn from(e: Box<dyn Error + Send + Sync>) -> Self {
        Self::Fail(e)
    }
}

/// Convenience type for fallible input operations.
pub type Result<T> = std::result::Result<T, AudioStreamError>;
