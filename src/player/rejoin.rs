use super::{PlayError, PlayerInner};
use crate::{driver::connection::error::Error as ConnectionError, events::ConnectionEvent};
use flume::Receiver;
use std::sync::{Arc, Weak};
use tokio::{spawn, task::JoinHandle};
use tracing::{error, info, instrument, warn};
use tracing_futures::Instrument;

pub(super) fn spawn_watcher(
    player: Weak<PlayerInner>,
    events: Receiver<ConnectionEvent>,
) -> JoinHandle<()> {
    spawn(watch(player, events).in_current_span())
}

/// Rejoins the connection whenever it fails to resolve the voice server.
#[instrument(skip(player, events))]
async fn watch(player: Weak<PlayerInner>, events: Receiver<ConnectionEvent>) {
    while let Ok(event) = events.recv_async().await {
        let ConnectionEvent::Error(e) = event else {
            continue;
        };

        if !e.is_resolution_failure() {
            continue;
        }

        let Some(player) = player.upgrade() else {
            break;
        };

        player.rejoin(e).await;

        // Failures raised by our own attempts were already handled.
        events.drain().for_each(drop);
    }
}

impl PlayerInner {
    /// Pauses playback, then retries the connection up to the configured
    /// number of times, resuming on success and failing fatally otherwise.
    pub(super) async fn rejoin(self: &Arc<Self>, cause: Arc<ConnectionError>) {
        warn!("Voice server could not be resolved: {cause}.");

        let was_playing = self.pause();
        let attempts = self.connection.config().rejoin_attempts;
        let mut last = cause;

        for attempt in 1..=attempts {
            match self.connection.rejoin().await {
                Ok(()) => {
                    info!("Rejoined on attempt {attempt}.");
                    if was_playing {
                        self.resume();
                    }
                    return;
                },
                Err(e) => {
                    warn!("Rejoin attempt {attempt} of {attempts} failed: {e}.");
                    last = e;
                },
            }
        }

        error!("Giving up after {attempts} rejoin attempts.");
        self.fail_fatally(PlayError::RejoinExhausted(last));
    }
}
