use super::message::*;
use crate::{
    driver::{connection::error::Error as ConnectionError, state::is_resumable, Shared},
    events::ConnectionEvent,
    model::{
        payload::{Heartbeat, Speaking},
        Event as GatewayEvent,
        SpeakingState,
    },
    ws::{Error as WsError, WsStream},
};
use flume::{Receiver, Sender};
use rand::random;
use std::{sync::Arc, time::Duration};
use tokio::{
    select,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, instrument, trace, warn};

/// Gateway task: heartbeats, speaking updates, and socket failure detection.
pub(crate) struct AuxNetwork {
    rx: Receiver<WsMessage>,
    ws_client: WsStream,
    dont_send: bool,

    ssrc: u32,
    heartbeat_interval: Duration,

    speaking: SpeakingState,
    last_heartbeat_nonce: Option<u64>,

    attempt_idx: usize,
    shared: Arc<Shared>,
    core: Sender<CoreMessage>,
}

impl AuxNetwork {
    pub(crate) fn new(
        evt_rx: Receiver<WsMessage>,
        ws_client: WsStream,
        ssrc: u32,
        heartbeat_interval: f64,
        attempt_idx: usize,
        shared: Arc<Shared>,
        core: Sender<CoreMessage>,
    ) -> Self {
        Self {
            rx: evt_rx,
            ws_client,
            dont_send: false,

            ssrc,
            heartbeat_interval: Duration::from_secs_f64(heartbeat_interval / 1000.0),

            speaking: SpeakingState::empty(),
            last_heartbeat_nonce: None,

            attempt_idx,
            shared,
            core,
        }
    }

    #[instrument(skip(self))]
    async fn run(&mut self) {
        let mut next_heartbeat = self.next_heartbeat();

        loop {
            let mut ws_error = None;

            let hb = sleep_until(next_heartbeat);

            select! {
                () = hb => {
                    if let Err(e) = self.send_heartbeat().await {
                        ws_error = Some(e);
                    }
                    next_heartbeat = self.next_heartbeat();
                }
                ws_msg = self.ws_client.recv_json_no_timeout(), if !self.dont_send => {
                    match ws_msg {
                        Err(e) => ws_error = Some(e),
                        Ok(Some(msg)) => self.process_ws(msg),
                        Ok(None) => {},
                    }
                }
                inner_msg = self.rx.recv_async() => {
                    match inner_msg {
                        Ok(WsMessage::Ws(data)) => {
                            self.ws_client = *data;
                            next_heartbeat = self.next_heartbeat();
                            self.dont_send = false;
                        },
                        Ok(WsMessage::SetKeepalive(keepalive)) => {
                            self.heartbeat_interval = Duration::from_secs_f64(keepalive / 1000.0);
                            next_heartbeat = self.next_heartbeat();
                        },
                        Ok(WsMessage::Speaking(is_speaking)) => {
                            if let Err(e) = self.send_speaking(is_speaking).await {
                                ws_error = Some(e);
                            }
                        },
                        Err(flume::RecvError::Disconnected) => {
                            break;
                        },
                    }
                }
            }

            if let Some(e) = ws_error {
                self.dont_send = true;

                let code = e.close_code();
                let resumable = is_resumable(code);
                debug!("Gateway socket failed (code {code:?}, resumable: {resumable}).");

                self.shared.error(ConnectionError::Ws(e));
                drop(
                    self.core
                        .send(CoreMessage::SignalWsClosure(self.attempt_idx, code)),
                );

                if !resumable {
                    break;
                }
            }
        }
    }

    fn next_heartbeat(&self) -> Instant {
        Instant::now() + self.heartbeat_interval
    }

    async fn send_heartbeat(&mut self) -> Result<(), WsError> {
        let nonce = random::<u64>();
        self.last_heartbeat_nonce = Some(nonce);

        trace!("Sent heartbeat {:?}", self.speaking);

        if !self.dont_send {
            self.ws_client
                .send_json(&GatewayEvent::from(Heartbeat { nonce }))
                .await?;
        }

        Ok(())
    }

    async fn send_speaking(&mut self, is_speaking: bool) -> Result<(), WsError> {
        if self.speaking.contains(SpeakingState::MICROPHONE) == is_speaking || self.dont_send {
            return Ok(());
        }

        self.speaking.set(SpeakingState::MICROPHONE, is_speaking);
        info!("Changing to {:?}", self.speaking);

        self.ws_client
            .send_json(&GatewayEvent::from(Speaking {
                delay: Some(0),
                speaking: self.speaking,
                ssrc: self.ssrc,
                user_id: None,
            }))
            .await
    }

    fn process_ws(&mut self, value: GatewayEvent) {
        match value {
            GatewayEvent::Speaking(ev) => {
                self.shared.events.emit(ConnectionEvent::SpeakingUpdate(ev));
            },
            GatewayEvent::ClientDisconnect(ev) => {
                self.shared.events.emit(ConnectionEvent::ClientDisconnect(ev));
            },
            GatewayEvent::ClientConnect(ev) => {
                debug!("Received discontinued ClientConnect: {:?}", ev);
            },
            GatewayEvent::HeartbeatAck(ev) => {
                if let Some(nonce) = self.last_heartbeat_nonce.take() {
                    if ev.nonce == nonce {
                        trace!("Heartbeat ACK received.");
                    } else {
                        warn!(
                            "Heartbeat nonce mismatch! Expected {}, saw {}.",
                            nonce, ev.nonce
                        );
                    }
                }
            },
            other => {
                debug!("Received other websocket data: op{}.", other.kind() as u8);
            },
        }
    }
}

pub(crate) async fn runner(mut aux: AuxNetwork) {
    trace!("WS thread started.");
    aux.run().await;
    trace!("WS thread finished.");
}
