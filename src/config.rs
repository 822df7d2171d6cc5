use crate::{constants::*, driver::CryptoMode};

use derivative::Derivative;
use std::time::Duration;

/// Configuration for connections and the players built on them.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct Config {
    /// Selected tagging mode for voice packet encryption.
    ///
    /// Defaults to `None`, which picks the best mode the server offers
    /// (lite, then suffix, then normal). A forced mode which the server does
    /// not offer fails the connection attempt.
    ///
    /// Changes to this field take effect on the next connection attempt.
    pub crypto_mode: Option<CryptoMode>,

    /// Connection retry timeout for a whole connect or resume attempt.
    ///
    /// Defaults to 10 seconds. If set to `None`, attempts may wait forever.
    pub driver_timeout: Option<Duration>,

    /// Time to wait for the voice server to answer IP discovery.
    ///
    /// Defaults to 5 seconds.
    pub discovery_timeout: Duration,

    /// Time a player waits for a new source to produce its first frame.
    ///
    /// Defaults to 25 seconds.
    pub readable_timeout: Duration,

    /// Number of immediate rejoins a player attempts when its connection fails
    /// to resolve the voice server's address.
    ///
    /// Defaults to 2.
    pub rejoin_attempts: usize,

    /// Program used to decode sources into Opus.
    ///
    /// Defaults to `ffmpeg`, found via `PATH`.
    pub ffmpeg_program: String,

    /// Number of frames buffered between a decoder and its player.
    ///
    /// Defaults to 25 (half a second of audio).
    #[derivative(Debug = "ignore")]
    pub frame_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crypto_mode: None,
            driver_timeout: Some(DEFAULT_DRIVER_TIMEOUT),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            readable_timeout: DEFAULT_READABLE_TIMEOUT,
            rejoin_attempts: DEFAULT_REJOIN_ATTEMPTS,
            ffmpeg_program: DEFAULT_FFMPEG_PROGRAM.into(),
            frame_buffer: CHILD_BUFFER_LEN,
        }
    }
}

impl Config {
    /// Sets this `Config`'s chosen cryptographic tagging scheme.
    #[must_use]
    pub fn crypto_mode(mut self, crypto_mode: Option<CryptoMode>) -> Self {
        self.crypto_mode = crypto_mode;
        self
    }

    /// Sets this `Config`'s timeout for establishing a voice connection.
    #[must_use]
    pub fn driver_timeout(mut self, driver_timeout: Option<Duration>) -> Self {
        self.driver_timeout = driver_timeout;
        self
    }

    /// Sets how long IP discovery may wait for the voice server's reply.
    #[must_use]
    pub fn discovery_timeout(mut self, discovery_timeout: Duration) -> Self {
        self.discovery_timeout = discovery_timeout;
        self
    }

    /// Sets how long a player waits for a new source's first frame.
    #[must_use]
    pub fn readable_timeout(mut self, readable_timeout: Duration) -> Self {
        self.readable_timeout = readable_timeout;
        self
    }

    /// Sets how many rejoins a player attempts after a resolution failure.
    #[must_use]
    pub fn rejoin_attempts(mut self, rejoin_attempts: usize) -> Self {
        self.rejoin_attempts = rejoin_attempts;
        self
    }

    /// Sets the decoder executable.
    #[must_use]
    pub fn ffmpeg_program(mut self, ffmpeg_program: impl Into<String>) -> Self {
        self.ffmpeg_program = ffmpeg_program.into();
        self
    }

    /// Sets the number of frames buffered per decoder. Values below one are raised to one.
    #[must_use]
    pub fn frame_buffer(mut self, frame_buffer: usize) -> Self {
        self.frame_buffer = frame_buffer.max(1);
        self
    }
}
