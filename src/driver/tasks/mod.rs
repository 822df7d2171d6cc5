#![allow(missing_docs)]

pub mod error;
pub mod message;
pub(crate) mod udp_tx;
pub(crate) mod ws;

use super::{
    connection::{error::Error as ConnectionError, Connection},
    ConnectionStage,
    Shared,
    Step,
};
use crate::{events::ConnectionEvent, ConnectionInfo};
use flume::{Receiver, RecvError, Sender};
use message::*;
use std::sync::Arc;
use tokio::spawn;
use tracing::{error, info, instrument, trace, warn};
use tracing_futures::Instrument;

pub(crate) fn start(shared: Arc<Shared>, rx: Receiver<CoreMessage>, tx: Sender<CoreMessage>) {
    spawn(
        async move {
            trace!("Driver started.");
            runner(shared, rx, tx).await;
            trace!("Driver finished.");
        }
        .in_current_span(),
    );
}

/// Book-keeping for the core task.
struct Core {
    shared: Arc<Shared>,
    tx: Sender<CoreMessage>,
    connection: Option<Connection>,
    last_info: Option<ConnectionInfo>,
    attempt_idx: usize,
}

impl Core {
    async fn connect(
        &mut self,
        info: ConnectionInfo,
        result_tx: Sender<Result<(), Arc<ConnectionError>>>,
    ) {
        self.drop_connection();
        self.attempt_idx = self.attempt_idx.wrapping_add(1);
        self.last_info = Some(info.clone());

        match Connection::new(info, &self.shared, &self.tx, self.attempt_idx).await {
            Ok(connection) => {
                self.connection = Some(connection);
                // Other side may not be listening: this is fine.
                drop(result_tx.send(Ok(())));
            },
            Err(why) => {
                warn!("Connection attempt failed: {why}.");
                self.shared.set_link(None);
                let why = if matches!(why, ConnectionError::AttemptDiscarded) {
                    Arc::new(why)
                } else {
                    self.shared.advance(Step::Closed(None));
                    self.shared.error(why)
                };
                drop(result_tx.send(Err(why)));
            },
        }
    }

    /// Handles a dead gateway socket or UDP socket on the live connection.
    async fn socket_closed(&mut self, idx: usize, code: Option<u16>) {
        let Some(conn) = self.connection.as_mut().filter(|c| c.idx == idx) else {
            trace!("Ignoring closure of stale attempt {idx}.");
            return;
        };

        match self.shared.advance(Step::Closed(code)) {
            ConnectionStage::Resume => match conn.resume(&self.shared).await {
                Ok(()) =>
                    if self.shared.advance(Step::Resumed) == ConnectionStage::Ready {
                        info!("Session resumed.");
                    },
                Err(e) => {
                    error!("Resume failed: {e}.");
                    self.shared.error(e);
                    self.shared.advance(Step::Closed(code));
                    self.close(code);
                },
            },
            ConnectionStage::Close => self.close(code),
            _ => {},
        }
    }

    fn close(&mut self, code: Option<u16>) {
        self.drop_connection();
        self.shared.events.emit(ConnectionEvent::Closed(code));
    }

    fn drop_connection(&mut self) {
        self.shared.set_link(None);
        self.connection = None;
    }
}

#[instrument(skip(shared, rx, tx))]
async fn runner(shared: Arc<Shared>, rx: Receiver<CoreMessage>, tx: Sender<CoreMessage>) {
    let mut core = Core {
        shared,
        tx,
        connection: None,
        last_info: None,
        attempt_idx: 0,
    };

    loop {
        match rx.recv_async().await {
            Ok(CoreMessage::ConnectWithResult(info, result_tx)) => {
                core.connect(info, result_tx).await;
            },
            Ok(CoreMessage::Rejoin(result_tx)) =>
                if let Some(info) = core.last_info.clone() {
                    core.connect(info, result_tx).await;
                } else {
                    let why = core.shared.error(ConnectionError::NotConnected);
                    drop(result_tx.send(Err(why)));
                },
            Ok(CoreMessage::Disconnect) => {
                core.drop_connection();
            },
            Ok(CoreMessage::SignalWsClosure(idx, code)) => {
                core.socket_closed(idx, code).await;
            },
            Ok(CoreMessage::UdpClosed(idx)) => {
                if core.shared.stage() == ConnectionStage::Ready {
                    core.socket_closed(idx, None).await;
                }
            },
            Err(RecvError::Disconnected) | Ok(CoreMessage::Poison) => {
                break;
            },
        }
    }

    core.shared.advance(Step::Destroy);
    core.drop_connection();
    trace!("Main thread exited");
}
