//! Paced playback of one source at a time over a [`VoiceConnection`].
//!
//! An [`AudioPlayer`] pulls one Opus frame from its current [`FrameSource`] on
//! each [`Scheduler`] tick, and forwards it to its connection. It is only
//! scheduled while playing, so idle and paused players cost nothing per tick.
//!
//! Players also watch their connection for name resolution failures, and try
//! to rejoin the voice server before giving up fatally.
//!
//! [`VoiceConnection`]: crate::driver::VoiceConnection
//! [`Scheduler`]: crate::driver::Scheduler

mod error;
mod rejoin;
mod state;

pub use self::{error::*, state::*};

use crate::{
    driver::{ScheduledTask, Scheduler, TaskError, TaskId, VoiceConnection},
    events::{EventSink, PlayerEvent},
    input::{Ffmpeg, FrameSource, Lifecycle, Passthrough, PlaybackSource, Resolve, Transcode},
};
use derivative::Derivative;
use flume::Receiver;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, info, instrument, trace, warn};

/// Plays sources over a voice connection, one frame per scheduler tick.
///
/// Clones refer to the same player.
#[derive(Clone, Debug)]
pub struct AudioPlayer {
    inner: Arc<PlayerInner>,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct PlayerInner {
    connection: VoiceConnection,
    scheduler: Scheduler,
    #[derivative(Debug = "ignore")]
    resolver: Arc<dyn Resolve>,
    #[derivative(Debug = "ignore")]
    transcoder: Arc<dyn Transcode>,
    playback: Mutex<Playback>,
    events: EventSink<PlayerEvent>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Mutable playback bookkeeping, guarded by one lock.
#[derive(Derivative, Default)]
#[derivative(Debug)]
struct Playback {
    state: PlayerState,
    /// Bumped by every request which invalidates in-flight `play` calls.
    generation: u64,
    #[derivative(Debug = "ignore")]
    frames: Option<Box<dyn FrameSource>>,
    /// The descriptor of the loaded source, as given to `play`.
    descriptor: Option<PlaybackSource>,
    /// The resolved form of the loaded source.
    resolved: Option<PlaybackSource>,
    task: Option<TaskId>,
}

impl Playback {
    /// Releases the loaded source, returning the task to pass to `unschedule`.
    fn unload(&mut self) -> Option<TaskId> {
        if let Some(mut frames) = self.frames.take() {
            frames.destroy();
        }
        self.descriptor = None;
        self.resolved = None;
        self.task.take()
    }
}

impl AudioPlayer {
    /// Creates a player which plays already-resolved locations through `ffmpeg`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(connection: VoiceConnection, scheduler: Scheduler) -> Self {
        Self::with_parts(
            connection,
            scheduler,
            Arc::new(Passthrough),
            Arc::new(Ffmpeg),
        )
    }

    /// Creates a player with a custom source resolver and decoder.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_parts(
        connection: VoiceConnection,
        scheduler: Scheduler,
        resolver: Arc<dyn Resolve>,
        transcoder: Arc<dyn Transcode>,
    ) -> Self {
        let conn_events = connection.subscribe();

        let inner = Arc::new(PlayerInner {
            connection,
            scheduler,
            resolver,
            transcoder,
            playback: Mutex::default(),
            events: EventSink::default(),
            watcher: Mutex::new(None),
        });

        let watcher = rejoin::spawn_watcher(Arc::downgrade(&inner), conn_events);
        *inner.watcher.lock() = Some(watcher);

        Self { inner }
    }

    /// Registers a listener for this player's [`PlayerEvent`]s.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the current playback state.
    pub fn state(&self) -> PlayerState {
        self.inner.playback.lock().state
    }

    /// Returns how far into the loaded source playback has reached, if one is loaded.
    pub fn position(&self) -> Option<Duration> {
        self.inner.playback.lock().frames.as_ref().map(|f| f.elapsed())
    }

    /// Returns the resolved form of the loaded source, if any.
    pub fn current(&self) -> Option<PlaybackSource> {
        self.inner.playback.lock().resolved.clone()
    }

    /// Returns the connection this player sends audio over.
    pub fn connection(&self) -> &VoiceConnection {
        &self.inner.connection
    }

    /// Replaces any loaded source with `source`, starting `seek` into it.
    ///
    /// A zero `seek` keeps any offset chosen by the resolver. Resolves once
    /// the new source is playing; failures are also reported to listeners,
    /// except for [`PlayError::Superseded`].
    #[instrument(skip(self))]
    pub async fn play(&self, source: PlaybackSource, seek: Duration) -> Result<()> {
        let seek = (!seek.is_zero()).then_some(seek);
        self.inner.play(source, seek).await
    }

    /// Pauses a playing source. Does nothing in any other state.
    ///
    /// Returns whether the player was paused.
    #[instrument(skip(self))]
    pub fn pause(&self) -> bool {
        self.inner.pause()
    }

    /// Resumes a paused source. Does nothing in any other state.
    ///
    /// Returns whether the player was resumed.
    #[instrument(skip(self))]
    pub fn resume(&self) -> bool {
        self.inner.resume()
    }

    /// Unloads any source and returns to [`PlayerState::Wait`], cancelling
    /// any `play` in progress.
    ///
    /// This is the only way out of [`PlayerState::Error`].
    #[instrument(skip(self))]
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Restarts the loaded source from `position`.
    #[instrument(skip(self))]
    pub async fn seek(&self, position: Duration) -> Result<()> {
        let descriptor = self.inner.playback.lock().descriptor.clone();
        let descriptor = descriptor.ok_or(PlayError::NothingPlaying)?;

        self.inner.play(descriptor, Some(position)).await
    }

    /// Stops playback and detaches from the connection for good.
    ///
    /// The player emits no further events afterwards.
    #[instrument(skip(self))]
    pub fn cleanup(&self) {
        self.inner.stop();

        if let Some(watcher) = self.inner.watcher.lock().take() {
            watcher.abort();
        }
    }
}

impl PlayerInner {
    async fn play(self: &Arc<Self>, source: PlaybackSource, seek: Option<Duration>) -> Result<()> {
        let (generation, replaced) = {
            let mut playback = self.playback.lock();
            if playback.state == PlayerState::Error {
                return Err(PlayError::Unusable);
            }

            playback.generation += 1;
            let replaced = if playback.state.is_active() {
                let task = playback.unload();
                self.set_state(&mut playback, PlayerState::Wait, PlayerEvent::Idle);
                task
            } else {
                None
            };
            (playback.generation, replaced)
        };
        self.unschedule(replaced);

        let mut resolved = match self.resolver.resolve(&source).await {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.fail(generation, PlayError::Resolve(Arc::new(e)))),
        };

        if let Some(seek) = seek {
            resolved.seek_offset = seek;
        }

        let config = self.connection.config();
        let mut frames = match self.transcoder.start(&resolved, config) {
            Ok(frames) => frames,
            Err(e) => return Err(self.fail(generation, PlayError::Create(Arc::new(e)))),
        };

        let ready = match timeout(config.readable_timeout, frames.readable()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PlayError::Create(e)),
            Err(_) => Err(PlayError::Timeout),
        };

        if let Err(e) = ready {
            frames.destroy();
            return Err(self.fail(generation, e));
        }

        {
            let mut playback = self.playback.lock();
            if playback.generation != generation {
                frames.destroy();
                return Err(PlayError::Superseded);
            }

            playback.frames = Some(frames);
            playback.descriptor = Some(source);
            playback.resolved = Some(resolved.clone());
            self.set_state(
                &mut playback,
                PlayerState::Playing,
                PlayerEvent::Playing(resolved),
            );
            self.schedule(&mut playback);
        }

        info!("Playback started.");
        self.connection.set_speaking(true);

        Ok(())
    }

    /// Reports a failed `play` unless a later request replaced it.
    fn fail(&self, generation: u64, e: PlayError) -> PlayError {
        let current = self.playback.lock().generation == generation;

        if current {
            warn!("{e}");
            self.events.emit(PlayerEvent::Error(e.clone()));
            e
        } else {
            PlayError::Superseded
        }
    }

    fn pause(&self) -> bool {
        let task = {
            let mut playback = self.playback.lock();
            if playback.state != PlayerState::Playing {
                return false;
            }

            self.set_state(&mut playback, PlayerState::Pause, PlayerEvent::Paused);
            playback.task.take()
        };

        self.unschedule(task);
        self.connection.set_speaking(false);
        true
    }

    fn resume(self: &Arc<Self>) -> bool {
        {
            let mut playback = self.playback.lock();
            if playback.state != PlayerState::Pause {
                return false;
            }

            let source = playback.resolved.clone().unwrap_or_default();
            self.set_state(
                &mut playback,
                PlayerState::Playing,
                PlayerEvent::Playing(source),
            );
            self.schedule(&mut playback);
        }

        self.connection.set_speaking(true);
        true
    }

    fn stop(&self) {
        let task = {
            let mut playback = self.playback.lock();
            playback.generation += 1;

            if playback.state == PlayerState::Wait {
                return;
            }

            let task = playback.unload();
            self.set_state(&mut playback, PlayerState::Wait, PlayerEvent::Idle);
            task
        };

        self.unschedule(task);
        self.connection.set_speaking(false);
    }

    /// Moves to the fatal error state, releasing any loaded source.
    fn fail_fatally(&self, e: PlayError) {
        let task = {
            let mut playback = self.playback.lock();
            playback.generation += 1;
            let task = playback.unload();
            self.set_state(&mut playback, PlayerState::Error, PlayerEvent::Error(e));
            task
        };

        self.unschedule(task);
        self.connection.set_speaking(false);
    }

    /// Applies a state change, emitting `event` only if the state differs.
    fn set_state(&self, playback: &mut Playback, state: PlayerState, event: PlayerEvent) {
        if playback.state == state {
            return;
        }

        debug!("Player state {:?} -> {:?}.", playback.state, state);
        playback.state = state;
        self.events.emit(event);
    }

    fn schedule(self: &Arc<Self>, playback: &mut Playback) {
        let scheduled = playback
            .task
            .is_some_and(|id| self.scheduler.contains(id));

        if !scheduled {
            playback.task = Some(self.scheduler.insert(self.clone()));
        }
    }

    /// Must be called without the playback lock held: a tick running this
    /// player holds its task while waiting on that lock.
    fn unschedule(&self, task: Option<TaskId>) {
        if let Some(id) = task {
            self.scheduler.remove(id);
        }
    }

    /// Handles a source which has no more frames to give.
    fn finish(&self, playback: &mut Playback, lifecycle: Lifecycle) {
        let position = playback
            .frames
            .as_ref()
            .map(|f| f.elapsed())
            .unwrap_or_default();

        let event = match lifecycle {
            Lifecycle::Running => return,
            Lifecycle::Ended => {
                info!("Playback ended at {position:?}.");
                PlayerEvent::Ended { position }
            },
            Lifecycle::Errored(e) => {
                warn!("Playback failed at {position:?}: {e}.");
                PlayerEvent::Error(PlayError::Stream(e))
            },
        };

        playback.generation += 1;
        if let Some(mut frames) = playback.frames.take() {
            frames.destroy();
        }
        playback.descriptor = None;
        playback.resolved = None;
        // The scheduler drops this task through its filter on the next tick.
        self.set_state(playback, PlayerState::Wait, event);
        self.connection.set_speaking(false);
    }
}

impl ScheduledTask for PlayerInner {
    fn filter(&self) -> bool {
        self.playback.lock().state == PlayerState::Playing
    }

    fn execute(&self) -> std::result::Result<(), TaskError> {
        let mut playback = self.playback.lock();
        if playback.state != PlayerState::Playing {
            return Ok(());
        }

        let Some(frames) = playback.frames.as_mut() else {
            return Ok(());
        };

        if let Some(frame) = frames.try_read() {
            self.connection.send_opus_frame(&frame);
            return Ok(());
        }

        let lifecycle = frames.lifecycle();
        if lifecycle.is_finished() {
            self.finish(&mut playback, lifecycle);
        } else {
            trace!("Frame source underrun.");
        }

        Ok(())
    }
}

impl Drop for PlayerInner {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }
}
