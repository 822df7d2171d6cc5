//! Connection errors and convenience types.

use crate::{
    driver::tasks::{error::Recipient, message::*},
    ws::Error as WsError,
};
use flume::SendError;
use serde_json::Error as JsonError;
use std::{error::Error as StdError, fmt, io::Error as IoError};
use tokio::time::error::Elapsed;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use xsalsa20poly1305::aead::Error as CryptoError;

/// Errors encountered while connecting to a voice server.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The driver hung up an internal signaller, either due to another connection attempt
    /// or a crash.
    AttemptDiscarded,
    /// An error occurred during encryption of voice packets.
    Crypto(CryptoError),
    /// The server's secret key was not a valid key for the chosen cipher.
    CryptoInvalidLength,
    /// Server did not return the expected crypto mode during negotiation.
    CryptoModeInvalid,
    /// No usable crypto mode was offered by the server.
    CryptoModeUnavailable,
    /// An indicator that an endpoint URL was invalid.
    EndpointUrl,
    /// The server failed to correctly respond to IP discovery.
    IllegalDiscoveryResponse,
    /// Could not parse the server's view of our IP.
    IllegalIp,
    /// The server did not answer IP discovery in time.
    IpDiscoveryTimedOut,
    /// Miscellaneous I/O error.
    Io(IoError),
    /// JSON (de)serialization error.
    Json(JsonError),
    /// Failed to message other background tasks after connection establishment.
    InterconnectFailure(Recipient),
    /// A rejoin was requested before any connection was attempted.
    NotConnected,
    /// Error communicating with gateway server over WebSocket.
    Ws(WsError),
    /// Connection attempt timed out.
    TimedOut,
}

impl Error {
    /// Whether this error came from failing to resolve the voice server's hostname.
    ///
    /// Such failures often clear up on an immediate retry, so players treat
    /// them as a signal to rejoin.
    pub fn is_resolution_failure(&self) -> bool {
        fn io_is_resolution(e: &IoError) -> bool {
            let text = e.to_string();
            text.contains("failed to lookup address")
                || text.contains("Name or service not known")
                || text.contains("Temporary failure in name resolution")
                || text.contains("No such host is known")
                || text.contains("nodename nor servname")
                || text.to_ascii_uppercase().contains("EAI_AGAIN")
                || text.contains("getaddrinfo")
        }

        match self {
            Error::Io(e) | Error::Ws(WsError::Ws(TungsteniteError::Io(e))) => io_is_resolution(e),
            _ => false,
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

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
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

impl From<WsError> for Error {
    fn from(e: WsError) -> Error {
        Error::Ws(e)
    }
}

impl From<Elapsed> for Error {
    fn from(_e: Elapsed) -> Error {
        Error::TimedOut
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect to voice server: ")?;
        use Error::*;
        match self {
            AttemptDiscarded => write!(f, "connection attempt was aborted/discarded"),
            Crypto(e) => write!(f, "{e}"),
            CryptoInvalidLength => write!(f, "server supplied key of invalid length"),
            CryptoModeInvalid => write!(f, "server changed negotiated encryption mode"),
            CryptoModeUnavailable => write!(f, "server did not offer a usable encryption mode"),
            EndpointUrl => write!(f, "endpoint URL received from gateway was invalid"),
            IllegalDiscoveryResponse => write!(f, "IP discovery/NAT punching response was invalid"),
            IllegalIp => write!(f, "IP discovery/NAT punching response had bad IP value"),
            IpDiscoveryTimedOut => write!(f, "IP discovery/NAT punching went unanswered"),
            Io(e) => write!(f, "{e}"),
            Json(e) => write!(f, "{e}"),
            InterconnectFailure(e) => write!(f, "failed to contact other task ({e:?})"),
            NotConnected => write!(f, "no previous connection to rejoin"),
            Ws(e) => write!(f, "websocket issue ({e})"),
            TimedOut => write!(f, "connection attempt timed out"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Ws(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience type for voice connection error handling.
pub type Result<T> = std::result::Result<T, Error>;
