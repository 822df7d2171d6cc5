use super::{error::Result, FilterChain};
use async_trait::async_trait;
use std::time::Duration;

/// A playable media location, with where to start and how to filter it.
///
/// Produced by the application and consumed once per `play` call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackSource {
    /// A file path or URL the decoder can open.
    pub location: String,
    /// Offset into the media at which playback starts.
    pub seek_offset: Duration,
    /// Filters applied while decoding.
    pub filters: FilterChain,
}

impl PlaybackSource {
    /// Creates a source starting at the beginning of `location`, unfiltered.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    /// Sets the offset at which playback starts.
    #[must_use]
    pub fn seek_offset(mut self, seek_offset: Duration) -> Self {
        self.seek_offset = seek_offset;
        self
    }

    /// Sets the filters applied while decoding.
    #[must_use]
    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    /// Returns whether the location must be fetched over HTTP.
    pub fn is_remote(&self) -> bool {
        let lower = self.location.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

/// Turns a track descriptor into a location the decoder can open.
///
/// Applications plug catalog lookups and stream URL extraction in here.
/// Failures are reported to listeners as a skippable playback error.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolves `source` into a directly playable source.
    async fn resolve(&self, source: &PlaybackSource) -> Result<PlaybackSource>;
}

/// A resolver for sources which are already directly playable.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

#[async_trait]
impl Resolve for Passthrough {
    async fn resolve(&self, source: &PlaybackSource) -> Result<PlaybackSource> {
        Ok(source.clone())
    }
}
