//! Stages of a voice connection, and the resources each one holds.

use super::{
    connection::error::{Error, Result},
    crypto::{CryptoMode, CryptoState},
    rtp::RtpFramer,
    udp::UdpTransport,
};
use crate::model::{payload::Ready, CloseCode as VoiceCloseCode, FromPrimitive};
use std::fmt;
use tracing::debug;
use xsalsa20poly1305::{aead::KeyInit, XSalsa20Poly1305 as Cipher};

/// The stage a [`VoiceConnection`] has reached, without any attached state.
///
/// [`VoiceConnection`]: super::VoiceConnection
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConnectionStage {
    /// Opening the gateway socket.
    UpWs,
    /// Socket open, Identify sent; awaiting Ready.
    Identify,
    /// Opening the UDP socket and performing IP discovery.
    UpUdp,
    /// SelectProtocol sent; awaiting SessionDescription.
    Protocol,
    /// Able to transmit audio.
    Ready,
    /// The gateway socket dropped, and is being resumed.
    Resume,
    /// Finished. A new `connect` is needed to transmit again.
    Close,
}

/// Mutable per-session state, created once the session's key is known.
pub struct ConnectionSecrets {
    pub(crate) mode: CryptoMode,
    pub(crate) cipher: Cipher,
    pub(crate) crypto: CryptoState,
    pub(crate) framer: RtpFramer,
    pub(crate) speaking: bool,
}

impl ConnectionSecrets {
    /// Sets up a session with fresh random RTP counters and a zeroed nonce.
    pub(crate) fn new(mode: CryptoMode, secret_key: &[u8], ssrc: u32) -> Result<Self> {
        let cipher = Cipher::new_from_slice(secret_key).map_err(|_| Error::CryptoInvalidLength)?;

        Ok(Self {
            mode,
            cipher,
            crypto: CryptoState::from(mode),
            framer: RtpFramer::new(ssrc),
            speaking: false,
        })
    }
}

impl fmt::Debug for ConnectionSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSecrets")
            .field("mode", &self.mode)
            .field("cipher", &"<secret>")
            .field("crypto", &self.crypto)
            .field("framer", &self.framer)
            .field("speaking", &self.speaking)
            .finish()
    }
}

/// Connection state machine; each stage carries what it has acquired so far.
#[derive(Debug)]
pub(crate) enum VoiceSocketState {
    UpWs,
    Identify,
    UpUdp {
        ready: Ready,
    },
    Protocol {
        ready: Ready,
        udp: UdpTransport,
    },
    Ready {
        udp: UdpTransport,
        secrets: ConnectionSecrets,
    },
    Resume {
        udp: UdpTransport,
        secrets: ConnectionSecrets,
    },
    Close {
        code: Option<u16>,
    },
}

/// Inputs driving [`VoiceSocketState::advance`].
#[derive(Debug)]
pub(crate) enum Step {
    /// A new connection attempt begins, discarding any previous session.
    Begin,
    WsOpen,
    Ready(Ready),
    Discovered(UdpTransport),
    Session(ConnectionSecrets),
    Resumed,
    /// The gateway socket closed, with an optional close code.
    Closed(Option<u16>),
    Destroy,
}

impl Default for VoiceSocketState {
    fn default() -> Self {
        Self::Close { code: None }
    }
}

impl VoiceSocketState {
    pub(crate) fn stage(&self) -> ConnectionStage {
        match self {
            Self::UpWs => ConnectionStage::UpWs,
            Self::Identify => ConnectionStage::Identify,
            Self::UpUdp { .. } => ConnectionStage::UpUdp,
            Self::Protocol { .. } => ConnectionStage::Protocol,
            Self::Ready { .. } => ConnectionStage::Ready,
            Self::Resume { .. } => ConnectionStage::Resume,
            Self::Close { .. } => ConnectionStage::Close,
        }
    }

    /// Computes the next state.
    ///
    /// Steps which make no sense in the current stage are ignored. Any UDP
    /// transport which is dropped by a transition is closed first.
    pub(crate) fn advance(self, step: Step) -> Self {
        use VoiceSocketState as S;

        match (self, step) {
            (s, Step::Begin) => {
                s.teardown();
                S::UpWs
            },
            (s, Step::Destroy) => {
                s.teardown();
                S::Close { code: None }
            },
            (S::UpWs, Step::WsOpen) => S::Identify,
            (S::Identify, Step::Ready(ready)) => S::UpUdp { ready },
            (S::UpUdp { ready }, Step::Discovered(udp)) => S::Protocol { ready, udp },
            (S::Protocol { udp, .. }, Step::Session(secrets)) => S::Ready { udp, secrets },
            (S::Ready { udp, secrets }, Step::Closed(code)) if is_resumable(code) =>
                S::Resume { udp, secrets },
            (S::Resume { udp, secrets }, Step::Resumed) => S::Ready { udp, secrets },
            (s @ S::Close { .. }, Step::Closed(_)) => s,
            (s, Step::Closed(code)) => {
                s.teardown();
                S::Close { code }
            },
            (s, step) => {
                debug!("Ignoring {:?} in stage {:?}.", step, s.stage());
                if let Step::Discovered(udp) = step {
                    udp.close();
                }
                s
            },
        }
    }

    fn teardown(&self) {
        match self {
            Self::Protocol { udp, .. } | Self::Ready { udp, .. } | Self::Resume { udp, .. } =>
                udp.close(),
            _ => {},
        }
    }
}

/// Decides whether a socket closed with `code` should be resumed rather than abandoned.
///
/// Transport-level closures (codes below 4000, or no close frame at all) and
/// voice server crashes are resumable. Every other application code is final.
pub(crate) fn is_resumable(code: Option<u16>) -> bool {
    match code {
        None => true,
        Some(c) if c < 4000 => true,
        Some(c) => VoiceCloseCode::from_u16(c).map_or(false, |code| code.should_resume()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::test_impls::*;

    fn ready_state() -> (VoiceSocketState, UdpTransport) {
        let (udp, _rx) = mock_udp();
        let state = VoiceSocketState::UpWs
            .advance(Step::WsOpen)
            .advance(Step::Ready(ready_payload()))
            .advance(Step::Discovered(udp.clone()))
            .advance(Step::Session(test_secrets(CryptoMode::Lite)));

        (state, udp)
    }

    #[test]
    fn handshake_reaches_ready() {
        let (state, udp) = ready_state();
        assert_eq!(state.stage(), ConnectionStage::Ready);
        assert!(!udp.is_closed());
    }

    #[test]
    fn crash_close_resumes() {
        let (state, udp) = ready_state();

        let state = state.advance(Step::Closed(Some(4015)));
        assert_eq!(state.stage(), ConnectionStage::Resume);
        assert!(!udp.is_closed());

        let state = state.advance(Step::Resumed);
        assert_eq!(state.stage(), ConnectionStage::Ready);
    }

    #[test]
    fn transport_level_close_resumes() {
        let (state, _udp) = ready_state();
        let state = state.advance(Step::Closed(Some(1006)));
        assert_eq!(state.stage(), ConnectionStage::Resume);
    }

    #[test]
    fn only_crash_and_transport_codes_resume() {
        assert!(is_resumable(Some(4015)));
        assert!(is_resumable(Some(1006)));
        assert!(is_resumable(Some(1000)));
        assert!(is_resumable(None));

        assert!(!is_resumable(Some(4006)));
        assert!(!is_resumable(Some(4014)));
        assert!(!is_resumable(Some(4004)));
        assert!(!is_resumable(Some(4999)));
    }

    #[test]
    fn session_invalid_closes_with_code() {
        let (state, udp) = ready_state();

        let state = state.advance(Step::Closed(Some(4006)));
        assert!(matches!(state, VoiceSocketState::Close { code: Some(4006) }));
        assert!(udp.is_closed());
    }

    #[test]
    fn close_during_resume_is_final() {
        let (state, udp) = ready_state();

        let state = state
            .advance(Step::Closed(Some(4015)))
            .advance(Step::Closed(Some(4015)));

        assert!(matches!(state, VoiceSocketState::Close { code: Some(4015) }));
        assert!(udp.is_closed());
    }

    #[test]
    fn out_of_order_messages_are_ignored() {
        let state = VoiceSocketState::UpWs.advance(Step::Ready(ready_payload()));
        assert_eq!(state.stage(), ConnectionStage::UpWs);

        let state = VoiceSocketState::Identify.advance(Step::Session(test_secrets(CryptoMode::Normal)));
        assert_eq!(state.stage(), ConnectionStage::Identify);

        let (state, _udp) = ready_state();
        let state = state.advance(Step::Resumed);
        assert_eq!(state.stage(), ConnectionStage::Ready);
    }

    #[test]
    fn destroy_releases_transport() {
        let (state, udp) = ready_state();

        let state = state.advance(Step::Destroy);
        assert!(matches!(state, VoiceSocketState::Close { code: None }));
        assert!(udp.is_closed());
    }
}
