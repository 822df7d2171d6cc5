use super::message::*;
use flume::SendError;
use std::{
    error::Error as StdError,
    fmt,
    io::{Error as IoError, ErrorKind as IoErrorKind},
};
use xsalsa20poly1305::aead::Error as CryptoError;

#[derive(Debug)]
pub enum Recipient {
    AuxNetwork,
    Core,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while transmitting a voice packet.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Crypto(CryptoError),
    InterconnectFailure(Recipient),
    Io(IoError),
    /// The frame plus its RTP and encryption overhead exceeds the safe packet size.
    OversizedFrame(usize),
}

impl Error {
    // This prevents a `WouldBlock` from being treated as a transport failure,
    // instead simply dropping the packet.
    pub(crate) fn disarm_would_block(self) -> Result<()> {
        match self {
            Self::Io(i) if i.kind() == IoErrorKind::WouldBlock => Ok(()),
            e => Err(e),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Crypto(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(e)
    }
}

impl From<SendError<WsMessage>> for Error {
    fn from(_e: SendError<WsMessage>) -> Error {
        Error::InterconnectFailure(Recipient::AuxNetwork)
    }
}

impl From<SendError<CoreMessage>> for Error {
    fn from(_e: SendError<CoreMessage>) -> Error {
        Error::InterconnectFailure(Recipient::Core)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to transmit voice packet: ")?;
        match self {
            Error::Crypto(e) => write!(f, "{e}"),
            Error::InterconnectFailure(r) => write!(f, "failed to contact other task ({r:?})"),
            Error::Io(e) => write!(f, "{e}"),
            Error::OversizedFrame(len) => write!(f, "frame of {len} bytes is too large to send"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}
