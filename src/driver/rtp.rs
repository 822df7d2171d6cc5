//! RTP framing of outgoing Opus packets.

use super::crypto::CryptoState;
use crate::constants::*;
use discortp::rtp::{MutableRtpPacket, RtpPacket};
use rand::random;
use std::num::Wrapping;
use xsalsa20poly1305::{aead::Error as CryptoError, XSalsa20Poly1305 as Cipher};

/// Length of the fixed RTP header placed before every payload.
pub const RTP_HEADER_LEN: usize = RtpPacket::minimum_packet_size();

/// Owns the per-session RTP counters and builds packets from them.
///
/// Counters only move through [`advance`], which callers invoke once a
/// packet has actually been handed to the transport.
///
/// [`advance`]: RtpFramer::advance
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RtpFramer {
    sequence: Wrapping<u16>,
    timestamp: Wrapping<u32>,
    ssrc: u32,
    packets_played: u64,
    frame_samples: u32,
}

impl RtpFramer {
    /// Creates a framer for `ssrc` with randomised starting counters.
    pub fn new(ssrc: u32) -> Self {
        Self::with_counters(ssrc, random(), random())
    }

    /// Creates a framer with known starting counters.
    pub fn with_counters(ssrc: u32, sequence: u16, timestamp: u32) -> Self {
        Self {
            sequence: Wrapping(sequence),
            timestamp: Wrapping(timestamp),
            ssrc,
            packets_played: 0,
            frame_samples: MONO_FRAME_SIZE as u32,
        }
    }

    /// Sequence number of the next packet.
    pub fn sequence(&self) -> u16 {
        self.sequence.0
    }

    /// Timestamp of the next packet.
    pub fn timestamp(&self) -> u32 {
        self.timestamp.0
    }

    /// Source identifier stamped on every packet.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Number of packets handed to the transport this session.
    pub fn packets_played(&self) -> u64 {
        self.packets_played
    }

    /// Writes the header for the next packet.
    pub fn header(&self) -> [u8; RTP_HEADER_LEN] {
        build_header(self.sequence.0, self.timestamp.0, self.ssrc)
    }

    /// Builds the complete wire packet for `payload` using the current counters.
    pub fn build(
        &self,
        crypto: &mut CryptoState,
        cipher: &Cipher,
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut packet =
            Vec::with_capacity(RTP_HEADER_LEN + payload.len() + crypto.kind().payload_overhead());

        packet.extend_from_slice(&self.header());
        crypto.encrypt(cipher, payload, &mut packet)?;

        Ok(packet)
    }

    /// Moves the counters past a packet which was sent.
    pub fn advance(&mut self) {
        self.sequence += Wrapping(1);
        self.timestamp += Wrapping(self.frame_samples);
        self.packets_played += 1;
    }
}

/// Builds a 12-byte RTP header for an Opus packet.
pub fn build_header(sequence: u16, timestamp: u32, ssrc: u32) -> [u8; RTP_HEADER_LEN] {
    let mut bytes = [0u8; RTP_HEADER_LEN];
    {
        let mut rtp = MutableRtpPacket::new(&mut bytes[..])
            .expect("FATAL: header buffer is always the minimum RTP packet size.");
        rtp.set_version(RTP_VERSION);
        rtp.set_payload_type(RTP_PROFILE_TYPE);
        rtp.set_sequence(sequence.into());
        rtp.set_timestamp(timestamp.into());
        rtp.set_ssrc(ssrc);
    }

    bytes
}
