#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Warbler is an async voice transport client, written in Rust.
//!
//! The library offers:
//!  * A [`VoiceConnection`], which negotiates a session with a voice gateway,
//!  discovers its external address over UDP, and sends encrypted RTP packets
//!  (`xsalsa20_poly1305`, `_suffix`, or `_lite` tagging). Dropped gateway
//!  sockets are resumed where the close code allows it.
//!  * A shared [`Scheduler`], a drift-corrected 20ms tick loop which paces
//!  every player in the process without a thread per player.
//!  * An [`AudioPlayer`], which turns [`PlaybackSource`]s into Opus frames via
//!  `ffmpeg` and sends one per tick, rejoining its connection when the voice
//!  server's address fails to resolve.
//!  * A [`PlayerManager`], an application-owned registry of players by guild.
//!
//! Connections and players publish typed [`events`], which applications
//! render however they like. Diagnostics are reported through [`tracing`];
//! no subscriber is installed by this crate.
//!
//! ## Requirements
//! All connections and players must be created within a Tokio runtime.
//! Playback through [`Ffmpeg`] needs an `ffmpeg` build with `libopus`,
//! found via `PATH` unless [`Config::ffmpeg_program`] says otherwise.
//!
//! [`VoiceConnection`]: driver::VoiceConnection
//! [`Scheduler`]: driver::Scheduler
//! [`AudioPlayer`]: player::AudioPlayer
//! [`PlaybackSource`]: input::PlaybackSource
//! [`Ffmpeg`]: input::Ffmpeg
//! [`tracing`]: https://docs.rs/tracing

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    // TODO: would require significant rewriting of all existing docs
    clippy::missing_errors_doc,
)]

mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod events;
pub mod id;
pub(crate) mod info;
pub mod input;
mod manager;
pub mod player;
mod ws;

pub use discortp as packet;
pub use serenity_voice_model as model;

pub use crate::{
    driver::VoiceConnection,
    events::{ConnectionEvent, PlayerEvent},
    manager::*,
    player::AudioPlayer,
};

pub use config::Config;
pub use info::ConnectionInfo;
