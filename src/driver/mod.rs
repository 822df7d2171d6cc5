//! Runner for a voice connection.
//!
//! Each [`VoiceConnection`] is served by a set of asynchronous tasks:
//!  * a core task, which owns connection attempts, resumes, and teardown,
//!  * a gateway task, which heartbeats and watches the control socket,
//!  * a UDP keepalive task, which notices when the media socket dies.
//!
//! Packet construction and transmission happen on the caller's side
//! (normally a [`Scheduler`] tick), so sends never wait on any of these tasks.

pub(crate) mod connection;
pub mod crypto;
pub mod rtp;
pub mod scheduler;
mod state;
pub(crate) mod tasks;
#[cfg(test)]
pub(crate) mod test_impls;
pub mod udp;

use connection::error::Error;
pub use crypto::CryptoMode;
pub use scheduler::{Config as SchedulerConfig, ScheduledTask, Scheduler, TaskError, TaskId};
pub use state::{ConnectionSecrets, ConnectionStage};
pub(crate) use state::{Step, VoiceSocketState};

use crate::{
    constants::*,
    events::{ConnectionEvent, EventSink},
    Config,
    ConnectionInfo,
};
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use flume::{r#async::RecvFut, Receiver, Sender};
use parking_lot::Mutex;
use rtp::RTP_HEADER_LEN;
use std::sync::Arc;
use tasks::{
    error::Error as TransmitError,
    message::{CoreMessage, WsMessage},
};
use tracing::{instrument, trace, warn};

/// The control object for a voice connection, handling signalling, transport,
/// and en/decryption of outgoing audio.
///
/// Clones refer to the same connection. Background tasks stop once the last
/// clone is dropped.
#[derive(Clone, Debug)]
pub struct VoiceConnection {
    shared: Arc<Shared>,
    core: Arc<CoreHandle>,
}

impl VoiceConnection {
    /// Creates a new voice connection in the `Close` stage.
    ///
    /// This will create the core voice task in the background, and so must be
    /// called from within a Tokio runtime.
    #[inline]
    pub fn new(config: Config) -> Self {
        let shared = Arc::new(Shared::new(config));
        let (tx, rx) = flume::unbounded();

        tasks::start(shared.clone(), rx, tx.clone());

        Self {
            shared,
            core: Arc::new(CoreHandle(tx)),
        }
    }

    /// Registers a listener for this connection's [`ConnectionEvent`]s.
    pub fn subscribe(&self) -> Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Connects to a voice server, discarding any existing session.
    ///
    /// The returned future resolves once the connection reaches
    /// [`ConnectionStage::Ready`], or fails.
    #[instrument(skip(self))]
    pub fn connect(&self, info: ConnectionInfo) -> Connect {
        let (tx, rx) = flume::bounded(1);

        self.send(CoreMessage::ConnectWithResult(info, tx));

        Connect {
            inner: rx.into_recv_async(),
        }
    }

    /// Connects from scratch using the most recent [`ConnectionInfo`].
    ///
    /// Fails with [`Error::NotConnected`] if `connect` was never called.
    #[instrument(skip(self))]
    pub fn rejoin(&self) -> Connect {
        let (tx, rx) = flume::bounded(1);

        self.send(CoreMessage::Rejoin(tx));

        Connect {
            inner: rx.into_recv_async(),
        }
    }

    /// Returns the current stage of the connection.
    pub fn stage(&self) -> ConnectionStage {
        self.shared.stage()
    }

    /// Returns the configuration this connection was built with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Announces whether audio is being transmitted.
    ///
    /// This is a no-op unless the connection is ready and the value changes.
    #[instrument(skip(self))]
    pub fn set_speaking(&self, speaking: bool) {
        self.shared.set_speaking(speaking);
    }

    /// Encrypts and sends one Opus frame.
    ///
    /// This is a no-op unless the connection is ready. The first frame sent while
    /// not speaking marks this client as speaking. RTP counters only advance when
    /// the packet is handed to the transport.
    pub fn send_opus_frame(&self, frame: &[u8]) {
        match self.shared.send_frame(frame) {
            Ok(()) => {},
            Err(TransmitError::OversizedFrame(len)) => {
                warn!("Dropping oversized frame of {len} bytes.");
            },
            Err(TransmitError::Io(e)) => {
                let idx = self.shared.attempt_idx();
                self.shared.error(Error::Io(e));

                if let Some(idx) = idx {
                    self.send(CoreMessage::UdpClosed(idx));
                }
            },
            Err(e) => {
                warn!("Failed to send frame: {e}.");
            },
        }
    }

    /// Leaves the voice server, tearing down signalling and transport.
    ///
    /// The connection moves to [`ConnectionStage::Close`] before this returns,
    /// so no further frames are sent.
    #[instrument(skip(self))]
    pub fn destroy(&self) {
        self.shared.advance(Step::Destroy);
        self.shared.set_link(None);
        self.send(CoreMessage::Disconnect);
    }

    fn send(&self, status: CoreMessage) {
        // Only fails if the core task has crashed, in which case all
        // future requests will fail too.
        drop(self.core.0.send(status));
    }

    /// A connection whose socket state is set directly, without any network.
    #[cfg(test)]
    pub(crate) fn with_state(config: Config, state: VoiceSocketState) -> Self {
        let conn = Self::new(config);
        *conn.shared.state.lock() = state;
        conn
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

#[derive(Debug)]
struct CoreHandle(Sender<CoreMessage>);

impl Drop for CoreHandle {
    fn drop(&mut self) {
        drop(self.0.send(CoreMessage::Poison));
    }
}

/// Handle to the gateway task of the live connection attempt.
#[derive(Clone, Debug)]
pub(crate) struct Link {
    pub(crate) idx: usize,
    pub(crate) ws: Sender<WsMessage>,
}

/// State shared between a [`VoiceConnection`], its background tasks, and its callers.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: Config,
    state: Mutex<VoiceSocketState>,
    link: Mutex<Option<Link>>,
    pub(crate) events: EventSink<ConnectionEvent>,
}

impl Shared {
    fn new(config: Config) -> Self {
        Self {
            config,
            state: Mutex::default(),
            link: Mutex::default(),
            events: EventSink::default(),
        }
    }

    pub(crate) fn stage(&self) -> ConnectionStage {
        self.state.lock().stage()
    }

    /// Applies `step` to the state machine, announcing any change of stage.
    pub(crate) fn advance(&self, step: Step) -> ConnectionStage {
        let (old, new) = {
            let mut state = self.state.lock();
            let old = state.stage();
            let next = std::mem::take(&mut *state).advance(step);
            let new = next.stage();
            *state = next;
            (old, new)
        };

        if old != new {
            trace!("Connection stage {old:?} -> {new:?}.");
            self.events.emit(ConnectionEvent::StateChange { old, new });
        }

        new
    }

    pub(crate) fn set_link(&self, link: Option<Link>) {
        *self.link.lock() = link;
    }

    pub(crate) fn attempt_idx(&self) -> Option<usize> {
        self.link.lock().as_ref().map(|l| l.idx)
    }

    pub(crate) fn error(&self, e: Error) -> Arc<Error> {
        let e = Arc::new(e);
        self.events.emit(ConnectionEvent::Error(e.clone()));
        e
    }

    fn set_speaking(&self, speaking: bool) {
        let mut state = self.state.lock();
        if let VoiceSocketState::Ready { secrets, .. } = &mut *state {
            if secrets.speaking != speaking {
                secrets.speaking = speaking;
                self.notify_speaking(speaking);
            }
        }
    }

    fn notify_speaking(&self, speaking: bool) {
        if let Some(link) = &*self.link.lock() {
            drop(link.ws.send(WsMessage::Speaking(speaking)));
        }
    }

    fn send_frame(&self, frame: &[u8]) -> Result<(), TransmitError> {
        let mut state = self.state.lock();
        let VoiceSocketState::Ready { udp, secrets } = &mut *state else {
            return Ok(());
        };

        let packet_len = RTP_HEADER_LEN + frame.len() + secrets.mode.payload_overhead();
        if packet_len > VOICE_PACKET_MAX {
            return Err(TransmitError::OversizedFrame(frame.len()));
        }

        if !secrets.speaking {
            secrets.speaking = true;
            self.notify_speaking(true);
        }

        let packet = secrets
            .framer
            .build(&mut secrets.crypto, &secrets.cipher, frame)?;

        match udp.send(&packet) {
            Ok(()) => {
                secrets.framer.advance();
                trace!("Sent packet {}.", secrets.framer.packets_played());
                Ok(())
            },
            Err(e) => TransmitError::from(e).disarm_would_block(),
        }
    }
}

/// Future for a call to [`VoiceConnection::connect`] or [`VoiceConnection::rejoin`].
///
/// This future awaits the *result* of a connection; the attempt itself
/// is driven by the connection's core task.
///
/// Failures are shared with the [`ConnectionEvent::Error`] raised for them.
pub struct Connect {
    inner: RecvFut<'static, Result<(), Arc<Error>>>,
}

impl Future for Connect {
    type Output = Result<(), Arc<Error>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(r) => Poll::Ready(
                r.map_err(|_| Arc::new(Error::AttemptDiscarded))
                    .and_then(|x| x),
            ),
            Poll::Pending => Poll::Pending,
        }
    }
}
