use crate::{
    driver::{connection::error::Error as ConnectionError, Scheduler, VoiceConnection},
    id::GuildId,
    player::AudioPlayer,
    Config,
    ConnectionInfo,
};
use dashmap::DashMap;
use parking_lot::RwLock as PRwLock;
use std::sync::Arc;
use tracing::{debug, instrument};

/// An application-owned registry of [`AudioPlayer`]s, one per guild.
///
/// Every player created here shares this manager's [`Scheduler`], so all
/// playback in the application is paced by a single tick loop.
#[derive(Debug)]
pub struct PlayerManager {
    players: DashMap<GuildId, AudioPlayer>,
    scheduler: Scheduler,
    config: PRwLock<Config>,
}

impl Default for PlayerManager {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl PlayerManager {
    /// Creates an empty manager, with its own scheduler.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_scheduler(config, Scheduler::default())
    }

    /// Creates an empty manager whose players tick on `scheduler`.
    #[must_use]
    pub fn with_scheduler(config: Config, scheduler: Scheduler) -> Self {
        Self {
            players: DashMap::new(),
            scheduler,
            config: config.into(),
        }
    }

    /// Retrieves the player for the given guild, if one exists.
    pub fn get<G: Into<GuildId>>(&self, guild_id: G) -> Option<AudioPlayer> {
        self.players
            .get(&guild_id.into())
            .map(|player| player.value().clone())
    }

    /// Retrieves the player for the given guild, creating an unconnected one
    /// if none is found.
    ///
    /// Must be called from within a Tokio runtime.
    #[inline]
    pub fn get_or_insert<G: Into<GuildId>>(&self, guild_id: G) -> AudioPlayer {
        self.get_or_insert_with(guild_id, AudioPlayer::new)
    }

    /// Retrieves the player for the given guild, building one from a fresh
    /// connection and this manager's scheduler if none is found.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_or_insert_with<G, F>(&self, guild_id: G, build: F) -> AudioPlayer
    where
        G: Into<GuildId>,
        F: FnOnce(VoiceConnection, Scheduler) -> AudioPlayer,
    {
        let guild_id = guild_id.into();

        self.get(guild_id).unwrap_or_else(|| {
            self.players
                .entry(guild_id)
                .or_insert_with(|| {
                    debug!("Creating player for {guild_id:?}.");
                    let connection = VoiceConnection::new(self.config.read().clone());
                    build(connection, self.scheduler.clone())
                })
                .clone()
        })
    }

    /// Connects the player for `info`'s guild, creating the player if needed.
    ///
    /// An `Err(..)` value still leaves the player accessible via [`get`].
    ///
    /// [`get`]: PlayerManager::get
    #[instrument(skip(self))]
    pub async fn join(&self, info: ConnectionInfo) -> Result<AudioPlayer, Arc<ConnectionError>> {
        let player = self.get_or_insert(info.guild_id);
        player.connection().connect(info).await?;

        Ok(player)
    }

    /// Stops and removes the player for the given guild, leaving its voice server.
    ///
    /// Returns whether a player was removed.
    #[instrument(skip(self, guild_id))]
    pub fn remove<G: Into<GuildId>>(&self, guild_id: G) -> bool {
        let Some((_, player)) = self.players.remove(&guild_id.into()) else {
            return false;
        };

        player.cleanup();
        player.connection().destroy();
        true
    }

    /// Creates an iterator over all players currently managed.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.players.iter().map(|x| (*x.key(), x.value().clone())),
        }
    }

    /// Returns the number of players currently managed.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Returns whether no players are managed.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Returns the scheduler shared by this manager's players.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Sets the configuration used for connections created from now on.
    pub fn set_config(&self, new_config: Config) {
        *self.config.write() = new_config;
    }
}

impl<'a> IntoIterator for &'a PlayerManager {
    type Item = <Iter<'a> as Iterator>::Item;

    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

type DashMapIter<'a> = dashmap::iter::Iter<'a, GuildId, AudioPlayer>;
type InnerIter<'a> =
    std::iter::Map<DashMapIter<'a>, fn(<DashMapIter<'a> as Iterator>::Item) -> (GuildId, AudioPlayer)>;

/// An iterator over all [`AudioPlayer`]s currently stored in a [`PlayerManager`].
pub struct Iter<'a> {
    inner: InnerIter<'a>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (GuildId, AudioPlayer);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        driver::{test_impls::*, ConnectionStage},
        input::{Passthrough, PlaybackSource},
        player::PlayerState,
    };
    use std::{num::NonZeroU64, time::Duration};

    fn guild(id: u64) -> GuildId {
        GuildId::from(NonZeroU64::new(id).unwrap())
    }

    #[tokio::test]
    async fn get_or_insert_reuses_players() {
        let manager = PlayerManager::default();
        assert!(manager.get(guild(1)).is_none());

        let first = manager.get_or_insert(guild(1));
        let again = manager.get_or_insert(guild(1));
        manager.get_or_insert(guild(2));

        assert_eq!(manager.len(), 2);
        assert_eq!(first.connection().stage(), ConnectionStage::Close);

        // Both handles drive the same player.
        let events = again.subscribe();
        first.stop();
        assert!(events.is_empty());
        assert_eq!(first.state(), again.state());

        let mut ids: Vec<_> = manager.iter().map(|(id, _)| id).collect();
        ids.sort_by_key(|id| NonZeroU64::from(*id));
        assert_eq!(ids, vec![guild(1), guild(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn players_share_scheduler() {
        let manager = PlayerManager::default();
        let transcoder = ScriptedTranscode::new(1000, ScriptEnd::Ended);

        for id in 1..=3 {
            let player = manager.get_or_insert_with(guild(id), |conn, sched| {
                AudioPlayer::with_parts(conn, sched, Arc::new(Passthrough), transcoder.clone())
            });
            player
                .play(PlaybackSource::new("a.ogg"), Duration::ZERO)
                .await
                .unwrap();
        }

        assert_eq!(manager.scheduler().len(), 3);
        assert!(manager
            .iter()
            .all(|(_, p)| p.state() == PlayerState::Playing));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_stops_and_forgets_player() {
        let manager = PlayerManager::default();
        let transcoder = ScriptedTranscode::new(1000, ScriptEnd::Ended);
        let player = manager.get_or_insert_with(guild(7), |conn, sched| {
            AudioPlayer::with_parts(conn, sched, Arc::new(Passthrough), transcoder.clone())
        });
        player
            .play(PlaybackSource::new("a.ogg"), Duration::ZERO)
            .await
            .unwrap();

        assert!(manager.remove(guild(7)));
        assert!(!manager.remove(guild(7)));

        assert!(manager.get(guild(7)).is_none());
        assert_eq!(player.state(), PlayerState::Wait);
        assert!(manager.scheduler().is_empty());
        assert!(transcoder.all_destroyed());
    }

    #[tokio::test]
    async fn failed_join_keeps_player() {
        let manager = PlayerManager::new(Config::default().driver_timeout(Some(Duration::from_secs(2))));

        let res = manager.join(test_info("ws://127.0.0.1:1")).await;

        assert!(res.is_err());
        assert!(manager.get(guild(1)).is_some());
    }
}
