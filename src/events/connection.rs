use crate::{
    driver::{connection::error::Error as ConnectionError, ConnectionStage},
    model::payload::{ClientDisconnect, Speaking},
};
use std::sync::Arc;

/// Events describing the life of a [`VoiceConnection`].
///
/// [`VoiceConnection`]: crate::driver::VoiceConnection
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ConnectionEvent {
    /// The connection moved between stages of its state machine.
    StateChange {
        /// Stage before the change.
        old: ConnectionStage,
        /// Stage after the change.
        new: ConnectionStage,
    },
    /// A child component reported an error.
    ///
    /// Errors do not change state by themselves; the connection resumes or
    /// closes through its own logic, and any further recovery is up to the caller.
    Error(Arc<ConnectionError>),
    /// The session ended and will not be resumed.
    ///
    /// Carries the gateway close code, if one was sent.
    Closed(Option<u16>),
    /// Another user's speaking state changed, mapping their user ID to an SSRC.
    SpeakingUpdate(Speaking),
    /// Another user left the voice channel.
    ClientDisconnect(ClientDisconnect),
}
