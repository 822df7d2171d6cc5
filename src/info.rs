use crate::id::{ChannelId, GuildId, UserId};
use std::fmt;

/// Parameters and information needed to start communicating with a voice server.
///
/// These credentials are supplied once per connection attempt and are never
/// modified by the driver; a [`Resume`] reuses them verbatim.
///
/// [`Resume`]: crate::model::payload::Resume
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
    /// ID of the voice channel being joined, if it is known.
    ///
    /// This is not needed to establish a connection, but can be useful
    /// for book-keeping.
    pub channel_id: Option<ChannelId>,
    /// URL of the voice websocket gateway server assigned to this call.
    ///
    /// Endpoints are normally bare `host[:port]` strings, to which `wss://` is added.
    /// An endpoint which already begins with `ws://` or `wss://` is used as given.
    pub endpoint: String,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: String,
    /// Ephemeral secret used to validate the above session.
    pub token: String,
    /// UserID of this bot.
    pub user_id: UserId,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::num::NonZeroU64;

    #[test]
    fn debug_output_hides_token() {
        let info = ConnectionInfo {
            channel_id: None,
            endpoint: "voice.example.com".into(),
            guild_id: GuildId::from(NonZeroU64::new(1).unwrap()),
            session_id: "session".into(),
            token: "hunter2".into(),
            user_id: UserId::from(NonZeroU64::new(2).unwrap()),
        };

        let out = format!("{info:?}");
        assert!(!out.contains("hunter2"));
        assert!(out.contains("<secret>"));
    }
}
