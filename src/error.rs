//! Connection, transport, and playback error handling.

pub use crate::{
    driver::{
        connection::error::{Error as ConnectionError, Result as ConnectionResult},
        tasks::error::{Error as TransmitError, Recipient},
    },
    input::AudioStreamError,
    player::{PlayError, Result as PlayResult},
    ws::Error as WsError,
};
