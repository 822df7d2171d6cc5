//! Audio sources and the decoders which turn them into Opus frames.
//!
//! Playing a [`PlaybackSource`] happens in three steps:
//!  * a [`Resolve`] implementation turns the application's descriptor into a
//!    location the decoder can open (the default, [`Passthrough`], assumes it
//!    already is one),
//!  * a [`Transcode`] implementation starts a decoder for it (normally
//!    [`Ffmpeg`], which produces a [`TranscodePipeline`]),
//!  * the player pulls 20ms frames from the resulting [`FrameSource`] once it
//!    is readable, one per scheduler tick.
//!
//! The decoder's output is only crossed over to async code through a bounded
//! queue, filled by a dedicated reader thread.

mod child;
mod error;
mod ffmpeg;
mod filters;
mod pipeline;
mod source;

pub use self::{
    child::ChildContainer,
    error::*,
    ffmpeg::*,
    filters::*,
    pipeline::{FrameSource, Lifecycle, TranscodePipeline},
    source::*,
};
