use crate::model::Event;

use futures::{SinkExt, StreamExt};
use serde_json::Error as JsonError;
use std::{error::Error as StdError, fmt};
use tokio::{
    net::TcpStream,
    time::{timeout, Duration},
};
use tokio_tungstenite::{
    tungstenite::{
        error::Error as TungsteniteError,
        protocol::{CloseFrame, WebSocketConfig as Config},
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, instrument, trace};
use url::Url;

/// A text-framed JSON websocket to a voice gateway.
pub struct WsStream(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsStream {
    #[instrument(skip(url), fields(host = ?url.host_str()))]
    pub(crate) async fn connect(url: Url) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async_with_config::<Url>(
            url,
            Some(Config {
                max_message_size: None,
                max_frame_size: None,
                ..Default::default()
            }),
            true,
        )
        .await?;

        Ok(Self(stream))
    }

    /// Waits a short while for the next message.
    ///
    /// Returns `Ok(None)` if nothing useful arrived in time, which lets callers
    /// interleave other work (heartbeats) with reads.
    pub(crate) async fn recv_json(&mut self) -> Result<Option<Event>> {
        const TIMEOUT: Duration = Duration::from_millis(500);

        let ws_message = match timeout(TIMEOUT, self.0.next()).await {
            Ok(Some(Ok(v))) => Some(v),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => return Err(Error::WsClosed(None)),
            Err(_) => None,
        };

        convert_ws_message(ws_message)
    }

    /// Waits for the next message.
    pub(crate) async fn recv_json_no_timeout(&mut self) -> Result<Option<Event>> {
        match self.0.next().await {
            Some(Ok(m)) => convert_ws_message(Some(m)),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::WsClosed(None)),
        }
    }

    pub(crate) async fn send_json(&mut self, value: &Event) -> Result<()> {
        let text = serde_json::to_string(value)?;
        trace!("Sending op{}.", value.kind() as u8);

        Ok(self.0.send(Message::Text(text)).await?)
    }
}

/// Convenience type for gateway socket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the gateway socket.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A message could not be encoded.
    Json(JsonError),

    /// The voice gateway does not offer compression, so only text messages are expected.
    UnexpectedBinaryMessage(Vec<u8>),

    /// The underlying websocket failed.
    Ws(TungsteniteError),

    /// The socket was closed, with the server's close frame if one was sent.
    WsClosed(Option<CloseFrame<'static>>),
}

impl Error {
    /// The close code sent by the gateway, if this error marks a closed socket.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::WsClosed(Some(frame)) => Some(u16::from(frame.code)),
            _ => None,
        }
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        Error::Ws(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(e) => write!(f, "gateway sent malformed JSON: {e}"),
            Error::UnexpectedBinaryMessage(b) =>
                write!(f, "gateway sent a binary message ({} bytes)", b.len()),
            Error::Ws(e) => write!(f, "websocket error: {e}"),
            Error::WsClosed(Some(frame)) => write!(
                f,
                "gateway closed the socket (code {}: {})",
                u16::from(frame.code),
                frame.reason
            ),
            Error::WsClosed(None) => write!(f, "gateway closed the socket"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Json(e) => Some(e),
            Error::Ws(e) => Some(e),
            _ => None,
        }
    }
}

#[inline]
pub(crate) fn convert_ws_message(message: Option<Message>) -> Result<Option<Event>> {
    Ok(match message {
        Some(Message::Text(payload)) => serde_json::from_str(&payload)
            .map_err(|e| {
                debug!("Unexpected JSON: {e}. Payload: {payload}");
                e
            })
            .ok(),
        Some(Message::Binary(bytes)) => {
            return Err(Error::UnexpectedBinaryMessage(bytes));
        },
        Some(Message::Close(frame)) => {
            return Err(Error::WsClosed(frame.map(CloseFrame::into_owned)));
        },
        // Ping/Pong message behaviour is internally handled by tungstenite.
        _ => None,
    })
}
