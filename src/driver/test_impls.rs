#![allow(missing_docs)]

use super::{
    crypto::KEY_SIZE,
    state::ConnectionSecrets,
    tasks::message::WsMessage,
    udp::UdpTransport,
    *,
};
use crate::{
    constants::TIMESTEP_LENGTH,
    id::{GuildId, UserId},
    input::{
        AudioStreamError,
        FrameSource,
        Lifecycle,
        PlaybackSource,
        Resolve,
        Result as InputResult,
        Transcode,
    },
    model::payload::Ready,
};
use async_trait::async_trait;
use flume::Receiver;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    num::NonZeroU64,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use xsalsa20poly1305::{aead::KeyInit, XSalsa20Poly1305 as Cipher};

pub const TEST_SSRC: u32 = 0x1234_5678;
pub const TEST_KEY: [u8; KEY_SIZE] = [42; KEY_SIZE];

/// A UDP transport whose datagrams arrive on the returned channel.
pub fn mock_udp() -> (UdpTransport, Receiver<Vec<u8>>) {
    let (tx, rx) = flume::unbounded();
    (UdpTransport::mock(tx), rx)
}

pub fn ready_payload() -> Ready {
    Ready {
        ssrc: TEST_SSRC,
        ip: [127, 0, 0, 1].into(),
        port: 5000,
        modes: CryptoMode::PREFERENCE
            .iter()
            .map(|m| m.to_request_str().to_string())
            .collect(),
    }
}

pub fn test_cipher() -> Cipher {
    Cipher::new_from_slice(&TEST_KEY).unwrap()
}

pub fn test_secrets(mode: CryptoMode) -> ConnectionSecrets {
    ConnectionSecrets::new(mode, &TEST_KEY, TEST_SSRC).unwrap()
}

pub fn test_info(endpoint: impl Into<String>) -> ConnectionInfo {
    ConnectionInfo {
        channel_id: None,
        endpoint: endpoint.into(),
        guild_id: GuildId::from(NonZeroU64::new(1).unwrap()),
        session_id: "test-session".into(),
        token: "test-token".into(),
        user_id: UserId::from(NonZeroU64::new(2).unwrap()),
    }
}

/// A connection in the `Ready` stage without any network.
///
/// Returns the connection, its outgoing datagrams, and the messages it
/// sends to its (absent) gateway task.
pub fn ready_connection(
    mode: CryptoMode,
) -> (VoiceConnection, Receiver<Vec<u8>>, Receiver<WsMessage>) {
    ready_connection_with_config(Config::default(), mode)
}

pub fn ready_connection_with_config(
    config: Config,
    mode: CryptoMode,
) -> (VoiceConnection, Receiver<Vec<u8>>, Receiver<WsMessage>) {
    let (udp, udp_rx) = mock_udp();
    let (ws_tx, ws_rx) = flume::unbounded();

    let conn = VoiceConnection::with_state(config, VoiceSocketState::Ready {
        udp,
        secrets: test_secrets(mode),
    });
    conn.shared().set_link(Some(Link { idx: 0, ws: ws_tx }));

    (conn, udp_rx, ws_rx)
}

/// Current `(sequence, timestamp)` of a ready connection.
pub fn counters(conn: &VoiceConnection) -> (u16, u32) {
    match &*conn.shared().state.lock() {
        VoiceSocketState::Ready { secrets, .. } | VoiceSocketState::Resume { secrets, .. } =>
            (secrets.framer.sequence(), secrets.framer.timestamp()),
        other => panic!("no counters in stage {:?}", other.stage()),
    }
}

/// How a [`ScriptedSource`] behaves once its frames run out, or before its first frame.
#[derive(Clone, Debug)]
pub enum ScriptEnd {
    /// Ends normally after the scripted frames.
    Ended,
    /// Fails after the scripted frames.
    Errored,
    /// Fails before becoming readable.
    Unreadable,
    /// Never becomes readable.
    Hang,
}

/// A [`FrameSource`] with a fixed list of frames.
#[derive(Debug)]
pub struct ScriptedSource {
    frames: VecDeque<Vec<u8>>,
    end: ScriptEnd,
    read: u32,
    seek_offset: Duration,
    destroyed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn readable(&mut self) -> Result<(), Arc<AudioStreamError>> {
        match self.end {
            ScriptEnd::Unreadable => Err(Arc::new(AudioStreamError::EndedBeforeReadable)),
            ScriptEnd::Hang => futures::future::pending().await,
            _ => Ok(()),
        }
    }

    fn try_read(&mut self) -> Option<Vec<u8>> {
        let frame = self.frames.pop_front()?;
        self.read += 1;
        Some(frame)
    }

    fn lifecycle(&self) -> Lifecycle {
        match (&self.end, self.frames.is_empty()) {
            (ScriptEnd::Ended, true) => Lifecycle::Ended,
            (ScriptEnd::Errored, true) =>
                Lifecycle::Errored(Arc::new(AudioStreamError::Fail("scripted failure".into()))),
            _ => Lifecycle::Running,
        }
    }

    fn elapsed(&self) -> Duration {
        self.seek_offset + TIMESTEP_LENGTH * self.read
    }

    fn destroy(&mut self) {
        self.frames.clear();
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// A [`Transcode`] handing out [`ScriptedSource`]s of `frames` frames each.
#[derive(Debug)]
pub struct ScriptedTranscode {
    pub frames: usize,
    pub end: ScriptEnd,
    pub starts: AtomicUsize,
    pub last_source: Mutex<Option<PlaybackSource>>,
    pub destroyed: Mutex<Vec<Arc<AtomicBool>>>,
}

impl ScriptedTranscode {
    pub fn new(frames: usize, end: ScriptEnd) -> Arc<Self> {
        Arc::new(Self {
            frames,
            end,
            starts: AtomicUsize::new(0),
            last_source: Mutex::new(None),
            destroyed: Mutex::new(vec![]),
        })
    }

    /// Whether every source handed out so far has been destroyed.
    pub fn all_destroyed(&self) -> bool {
        self.destroyed
            .lock()
            .iter()
            .all(|d| d.load(Ordering::SeqCst))
    }
}

impl Transcode for ScriptedTranscode {
    fn start(
        &self,
        source: &PlaybackSource,
        _config: &Config,
    ) -> InputResult<Box<dyn FrameSource>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.last_source.lock() = Some(source.clone());

        let destroyed = Arc::new(AtomicBool::new(false));
        self.destroyed.lock().push(destroyed.clone());

        #[allow(clippy::cast_possible_truncation)]
        let frames = (0..self.frames).map(|i| vec![i as u8; 20]).collect();

        Ok(Box::new(ScriptedSource {
            frames,
            end: self.end.clone(),
            read: 0,
            seek_offset: source.seek_offset,
            destroyed,
        }))
    }
}

/// A [`Resolve`] which always fails.
#[derive(Debug)]
pub struct FailingResolver;

#[async_trait]
impl Resolve for FailingResolver {
    async fn resolve(&self, _source: &PlaybackSource) -> InputResult<PlaybackSource> {
        Err(AudioStreamError::Fail("no such track".into()))
    }
}

/// A loopback voice gateway, driven step by step from tests.
pub mod gateway {
    use super::{ready_payload, TEST_KEY};
    use crate::{
        driver::ConnectionStage,
        events::ConnectionEvent,
        model::{
            payload::{Hello, HeartbeatAck, SessionDescription},
            Event as GatewayEvent,
        },
    };
    use futures::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::{net::SocketAddr, sync::Arc};
    use tokio::net::{TcpListener, TcpStream, UdpSocket};
    use tokio_tungstenite::{
        accept_async,
        tungstenite::{
            protocol::{frame::coding::CloseCode, CloseFrame},
            Message,
        },
        WebSocketStream,
    };

    pub type Server = WebSocketStream<TcpStream>;

    /// Answers IP discovery requests, reporting the sender's own address.
    pub async fn udp_responder() -> (SocketAddr, Arc<UdpSocket>) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();

        let s = socket.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            while let Ok((len, from)) = s.recv_from(&mut buf).await {
                if len != 74 || buf[1] != 1 {
                    continue;
                }

                let mut out = [0u8; 74];
                out[1] = 2;
                out[3] = 70;
                out[4..8].copy_from_slice(&buf[4..8]);
                let ip = from.ip().to_string();
                out[8..8 + ip.len()].copy_from_slice(ip.as_bytes());
                out[72..].copy_from_slice(&from.port().to_be_bytes());

                let _ = s.send_to(&out, from).await;
            }
        });

        (addr, socket)
    }

    pub async fn recv_op(ws: &mut Server) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(t) => {
                    let v: Value = serde_json::from_str(&t).unwrap();
                    // Heartbeats may interleave with anything; answer and skip them.
                    if v["op"] == 3 {
                        let ack = GatewayEvent::from(HeartbeatAck {
                            nonce: v["d"].as_u64().unwrap(),
                        });
                        send(ws, &ack).await;
                        continue;
                    }
                    return v;
                },
                _ => continue,
            }
        }
    }

    pub async fn send(ws: &mut Server, ev: &GatewayEvent) {
        ws.send(Message::Text(serde_json::to_string(ev).unwrap()))
            .await
            .unwrap();
    }

    pub async fn close(ws: &mut Server, code: u16) {
        ws.close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        }))
        .await
        .unwrap();
    }

    /// Runs a gateway through Identify -> Ready -> SelectProtocol -> SessionDescription.
    pub async fn identify(listener: &TcpListener, udp: SocketAddr) -> (Server, Value) {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();

        let identify = recv_op(&mut ws).await;
        assert_eq!(identify["op"], 0);
        assert_eq!(identify["d"]["token"], "test-token");

        send(&mut ws, &GatewayEvent::from(Hello {
            heartbeat_interval: 41_250.0,
        }))
        .await;
        let mut ready = ready_payload();
        ready.ip = udp.ip();
        ready.port = udp.port();
        send(&mut ws, &GatewayEvent::from(ready)).await;

        let select = recv_op(&mut ws).await;
        assert_eq!(select["op"], 1);

        send(&mut ws, &GatewayEvent::from(SessionDescription {
            mode: select["d"]["mode"].as_str().unwrap().into(),
            secret_key: TEST_KEY.to_vec(),
        }))
        .await;

        (ws, select)
    }

    pub async fn wait_for_stage(
        events: &flume::Receiver<ConnectionEvent>,
        stage: ConnectionStage,
    ) {
        loop {
            match events.recv_async().await.unwrap() {
                ConnectionEvent::StateChange { new, .. } if new == stage => return,
                _ => {},
            }
        }
    }
}
