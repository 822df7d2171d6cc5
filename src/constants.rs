//! Constants affecting driver function and API handling.

use discortp::rtp::RtpType;
use std::time::Duration;

/// The voice gateway version used by the library.
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Sample rate of audio to be sent to the voice server.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of audio frames/packets to be sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Length of time between any two audio frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Number of samples in one complete frame of audio per channel.
///
/// This is equally the number of stereo (joint) samples in an audio frame,
/// and the amount the RTP timestamp advances per packet.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Length (in milliseconds) of any audio frame.
pub const FRAME_LEN_MS: usize = 1000 / AUDIO_FRAME_RATE;

/// Number of audio frames buffered between a decoder process and its player.
pub const CHILD_BUFFER_LEN: usize = AUDIO_FRAME_RATE / 2;

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Delay between sends of UDP keepalive frames.
pub const UDP_KEEPALIVE_GAP: Duration = Duration::from_secs(5);

/// The one (and only) RTP version.
pub const RTP_VERSION: u8 = 2;

/// Profile type used by Opus audio traffic.
///
/// Together with [`RTP_VERSION`], this makes the first two header bytes `0x80 0x78`.
pub const RTP_PROFILE_TYPE: RtpType = RtpType::Dynamic(120);

/// Default time allowed for a whole connection (or resume) attempt.
pub const DEFAULT_DRIVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time to wait for a reply to an IP discovery request.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for a decoder to produce its first frame.
pub const DEFAULT_READABLE_TIMEOUT: Duration = Duration::from_secs(25);

/// Default number of rejoin attempts a player makes after a name resolution failure.
pub const DEFAULT_REJOIN_ATTEMPTS: usize = 2;

/// Executable used to decode and re-encode audio sources.
pub const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";
