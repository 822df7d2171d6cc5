//! Encryption schemes supported by the voice server's secure RTP negotiation.
use byteorder::{ByteOrder, NetworkEndian};
use rand::Rng;
use std::num::Wrapping;
use xsalsa20poly1305::{
    aead::{AeadInPlace, Error as CryptoError},
    Nonce,
    XSalsa20Poly1305 as Cipher,
};

/// Length of a session's secret key.
pub const KEY_SIZE: usize = 32;
/// Length of the Poly1305 tag placed before each payload.
pub const TAG_SIZE: usize = 16;
/// Length of a full XSalsa20 nonce.
pub const NONCE_SIZE: usize = 24;

/// Length of the counter appended to each packet in [`CryptoMode::Lite`].
const LITE_NONCE_SIZE: usize = 4;

/// Variants of the XSalsa20Poly1305 encryption scheme.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CryptoMode {
    /// A fixed, all-zero nonce is used for every packet.
    ///
    /// No extra bytes are sent. Only offered for servers lacking the other modes.
    Normal,
    /// A random 24B suffix is used as the nonce for the packet.
    /// This is regenerated randomly for each packet.
    ///
    /// Full nonce width of 24B (192b), at an extra 24B per packet (~1.2 kB/s).
    Suffix,
    /// A 4B counter is used as the nonce for the packet.
    /// This value increments by `1` with each packet.
    ///
    /// Nonce width of 4B (32b), at an extra 4B per packet (~0.2 kB/s).
    Lite,
}

impl CryptoMode {
    /// Every mode, in order of preference during negotiation.
    pub const PREFERENCE: [CryptoMode; 3] = [CryptoMode::Lite, CryptoMode::Suffix, CryptoMode::Normal];

    /// Returns the name of a mode as it will appear during negotiation.
    pub fn to_request_str(self) -> &'static str {
        use CryptoMode::*;
        match self {
            Normal => "xsalsa20_poly1305",
            Suffix => "xsalsa20_poly1305_suffix",
            Lite => "xsalsa20_poly1305_lite",
        }
    }

    /// Parses a mode from its negotiation name.
    pub fn from_request_str(s: &str) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|mode| mode.to_request_str() == s)
    }

    /// Picks the mode to use from those advertised by a server.
    ///
    /// A `forced` mode is used only if the server offers it. Otherwise the first
    /// advertised mode in [`PREFERENCE`] order is chosen.
    ///
    /// [`PREFERENCE`]: Self::PREFERENCE
    pub fn negotiate<S: AsRef<str>>(available: &[S], forced: Option<CryptoMode>) -> Option<Self> {
        let offered = |mode: &CryptoMode| {
            available
                .iter()
                .any(|s| s.as_ref() == mode.to_request_str())
        };

        match forced {
            Some(mode) => Some(mode).filter(offered),
            None => Self::PREFERENCE.into_iter().find(offered),
        }
    }

    /// Returns the number of bytes occupied by the encryption scheme
    /// which fall before the payload.
    pub fn payload_prefix_len(self) -> usize {
        TAG_SIZE
    }

    /// Returns the number of bytes occupied by the encryption scheme
    /// which fall after the payload.
    pub fn payload_suffix_len(self) -> usize {
        use CryptoMode::*;
        match self {
            Normal => 0,
            Suffix => NONCE_SIZE,
            Lite => LITE_NONCE_SIZE,
        }
    }

    /// Calculates the number of additional bytes required compared
    /// to an unencrypted payload.
    pub fn payload_overhead(self) -> usize {
        self.payload_prefix_len() + self.payload_suffix_len()
    }
}

impl From<CryptoState> for CryptoMode {
    fn from(val: CryptoState) -> Self {
        use CryptoState::*;
        match val {
            Normal => CryptoMode::Normal,
            Suffix => CryptoMode::Suffix,
            Lite(_) => CryptoMode::Lite,
        }
    }
}

/// Per-session nonce state for the chosen [`CryptoMode`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CryptoState {
    /// Fixed all-zero nonce.
    Normal,
    /// Fresh random nonce per packet.
    Suffix,
    /// Last counter value placed on the wire.
    Lite(Wrapping<u32>),
}

impl From<CryptoMode> for CryptoState {
    fn from(val: CryptoMode) -> Self {
        use CryptoMode::*;
        match val {
            Normal => CryptoState::Normal,
            Suffix => CryptoState::Suffix,
            Lite => CryptoState::Lite(Wrapping(0)),
        }
    }
}

impl CryptoState {
    /// Returns the underlying (stateless) type of the active crypto mode.
    pub fn kind(&self) -> CryptoMode {
        CryptoMode::from(*self)
    }

    /// Encrypts `payload`, appending `tag || ciphertext || nonce suffix` to `out`.
    ///
    /// The lite counter wraps to zero after `u32::MAX` without the key being changed.
    pub fn encrypt(
        &mut self,
        cipher: &Cipher,
        payload: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];

        match self {
            CryptoState::Normal => {},
            CryptoState::Suffix => {
                rand::thread_rng().fill(&mut nonce[..]);
            },
            CryptoState::Lite(i) => {
                *i += Wrapping(1);
                NetworkEndian::write_u32(&mut nonce[..LITE_NONCE_SIZE], i.0);
            },
        }

        let body_start = out.len();
        out.extend_from_slice(&[0u8; TAG_SIZE]);
        out.extend_from_slice(payload);

        let tag = cipher.encrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            b"",
            &mut out[body_start + TAG_SIZE..],
        )?;
        out[body_start..body_start + TAG_SIZE].copy_from_slice(&tag[..]);

        let suffix_len = self.kind().payload_suffix_len();
        out.extend_from_slice(&nonce[..suffix_len]);

        Ok(())
    }
}

/// Reverses [`CryptoState::encrypt`] on a full packet, returning the plaintext.
#[cfg(test)]
pub(crate) fn decrypt(
    mode: CryptoMode,
    cipher: &Cipher,
    packet: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    use xsalsa20poly1305::Tag;

    const HEADER_LEN: usize = 12;

    let suffix_len = mode.payload_suffix_len();
    if packet.len() < HEADER_LEN + TAG_SIZE + suffix_len {
        return Err(CryptoError);
    }

    let body = &packet[HEADER_LEN..];
    let (body, suffix) = body.split_at(body.len() - suffix_len);

    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..suffix_len].copy_from_slice(suffix);

    let (tag, ciphertext) = body.split_at(TAG_SIZE);
    let mut plain = ciphertext.to_vec();
    cipher.decrypt_in_place_detached(
        Nonce::from_slice(&nonce),
        b"",
        &mut plain,
        Tag::from_slice(tag),
    )?;

    Ok(plain)
}
