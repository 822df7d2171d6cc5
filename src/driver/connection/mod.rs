pub mod error;

use super::{
    crypto::CryptoMode,
    state::{ConnectionSecrets, ConnectionStage, Step},
    tasks::{
        message::*,
        udp_tx,
        ws::{self as ws_task, AuxNetwork},
    },
    udp::UdpTransport,
    Link,
    Shared,
};
use crate::{
    constants::*,
    model::{
        payload::{Identify, Resume, SelectProtocol},
        Event as GatewayEvent,
        ProtocolData,
    },
    ws::WsStream,
    ConnectionInfo,
};
use error::{Error, Result};
use flume::Sender;
use std::sync::Arc;
use tokio::{spawn, task::JoinHandle, time::timeout};
use tracing::{debug, info, instrument};
use tracing_futures::Instrument;
use url::Url;

/// A live session with a voice server, and the tasks serving it.
///
/// Dropping a `Connection` stops its background tasks.
pub(crate) struct Connection {
    pub(crate) info: ConnectionInfo,
    pub(crate) ssrc: u32,
    pub(crate) idx: usize,
    pub(crate) ws: Sender<WsMessage>,
    udp: UdpTransport,
    core: Sender<CoreMessage>,
    ws_task: JoinHandle<()>,
    udp_task: JoinHandle<()>,
}

impl Connection {
    pub(crate) async fn new(
        info: ConnectionInfo,
        shared: &Arc<Shared>,
        core: &Sender<CoreMessage>,
        idx: usize,
    ) -> Result<Connection> {
        if let Some(t) = shared.config.driver_timeout {
            timeout(t, Connection::new_inner(info, shared, core, idx)).await?
        } else {
            Connection::new_inner(info, shared, core, idx).await
        }
    }

    #[instrument(skip(info, shared, core), fields(endpoint = %info.endpoint))]
    async fn new_inner(
        info: ConnectionInfo,
        shared: &Arc<Shared>,
        core: &Sender<CoreMessage>,
        idx: usize,
    ) -> Result<Connection> {
        let config = &shared.config;
        expect_stage(shared.advance(Step::Begin), ConnectionStage::UpWs)?;

        let url = generate_url(&info.endpoint)?;
        let mut client = WsStream::connect(url).await?;
        expect_stage(shared.advance(Step::WsOpen), ConnectionStage::Identify)?;

        client
            .send_json(&GatewayEvent::from(Identify {
                server_id: info.guild_id.into(),
                session_id: info.session_id.clone(),
                token: info.token.clone(),
                user_id: info.user_id.into(),
            }))
            .await?;

        let mut hello = None;
        let mut ready = None;

        while hello.is_none() || ready.is_none() {
            let Some(value) = client.recv_json().await? else {
                continue;
            };

            match value {
                GatewayEvent::Ready(r) => ready = Some(r),
                GatewayEvent::Hello(h) => hello = Some(h),
                other => {
                    debug!("Expected ready/hello; got: op{}.", other.kind() as u8);
                },
            }
        }

        let (Some(hello), Some(ready)) = (hello, ready) else {
            return Err(Error::AttemptDiscarded);
        };

        let mode = CryptoMode::negotiate(&ready.modes, config.crypto_mode)
            .ok_or(Error::CryptoModeUnavailable)?;
        let ssrc = ready.ssrc;
        let (server_ip, server_port) = (ready.ip, ready.port);

        expect_stage(shared.advance(Step::Ready(ready)), ConnectionStage::UpUdp)?;

        let udp = UdpTransport::open(server_ip, server_port).await?;
        let external = udp.discover_ip(ssrc, config.discovery_timeout).await?;

        expect_stage(
            shared.advance(Step::Discovered(udp.clone())),
            ConnectionStage::Protocol,
        )?;

        client
            .send_json(&GatewayEvent::from(SelectProtocol {
                protocol: "udp".into(),
                data: ProtocolData {
                    address: external.ip(),
                    mode: mode.to_request_str().into(),
                    port: external.port(),
                },
            }))
            .await?;

        let secrets = init_secrets(&mut client, mode, ssrc).await?;

        info!("Connected to: {}", info.endpoint);
        info!("WS heartbeat duration {}ms.", hello.heartbeat_interval);

        let (ws_msg_tx, ws_msg_rx) = flume::unbounded();

        let ws_state = AuxNetwork::new(
            ws_msg_rx,
            client,
            ssrc,
            hello.heartbeat_interval,
            idx,
            shared.clone(),
            core.clone(),
        );

        let ws_task = spawn(ws_task::runner(ws_state).in_current_span());
        let udp_task = spawn_keepalive(&udp, ssrc, idx, core);

        let conn = Connection {
            info,
            ssrc,
            idx,
            ws: ws_msg_tx.clone(),
            udp,
            core: core.clone(),
            ws_task,
            udp_task,
        };

        shared.set_link(Some(Link { idx, ws: ws_msg_tx }));
        expect_stage(shared.advance(Step::Session(secrets)), ConnectionStage::Ready)?;

        Ok(conn)
    }

    /// Re-opens the gateway socket, keeping the session's key and SSRC.
    #[instrument(skip(self, shared))]
    pub(crate) async fn resume(&mut self, shared: &Shared) -> Result<()> {
        if let Some(t) = shared.config.driver_timeout {
            timeout(t, self.resume_inner()).await?
        } else {
            self.resume_inner().await
        }
    }

    async fn resume_inner(&mut self) -> Result<()> {
        let url = generate_url(&self.info.endpoint)?;
        let mut client = WsStream::connect(url).await?;

        client
            .send_json(&GatewayEvent::from(Resume {
                server_id: self.info.guild_id.into(),
                session_id: self.info.session_id.clone(),
                token: self.info.token.clone(),
            }))
            .await?;

        let mut hello = None;
        let mut resumed = false;

        while hello.is_none() || !resumed {
            let Some(value) = client.recv_json().await? else {
                continue;
            };

            match value {
                GatewayEvent::Resumed => resumed = true,
                GatewayEvent::Hello(h) => hello = Some(h),
                other => {
                    debug!("Expected resumed/hello; got: op{}.", other.kind() as u8);
                },
            }
        }

        let Some(hello) = hello else {
            return Err(Error::AttemptDiscarded);
        };

        self.ws
            .send(WsMessage::SetKeepalive(hello.heartbeat_interval))?;
        self.ws.send(WsMessage::Ws(Box::new(client)))?;

        if self.udp_task.is_finished() {
            self.udp_task = spawn_keepalive(&self.udp, self.ssrc, self.idx, &self.core);
        }

        info!("Resumed session at: {}", self.info.endpoint);
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.ws_task.abort();
        self.udp_task.abort();
        info!("Disconnected");
    }
}

fn spawn_keepalive(
    udp: &UdpTransport,
    ssrc: u32,
    idx: usize,
    core: &Sender<CoreMessage>,
) -> JoinHandle<()> {
    spawn(udp_tx::runner(udp.clone(), ssrc, idx, core.clone()).in_current_span())
}

fn expect_stage(reached: ConnectionStage, wanted: ConnectionStage) -> Result<()> {
    if reached == wanted {
        Ok(())
    } else {
        // Someone else (`destroy`, or a newer attempt) moved the state machine.
        Err(Error::AttemptDiscarded)
    }
}

/// Builds the gateway URL for an endpoint.
///
/// Endpoints with an explicit `ws://` or `wss://` scheme are used as given.
/// Otherwise, `wss://` is assumed and any `:80` port suffix is removed.
pub(crate) fn generate_url(endpoint: &str) -> Result<Url> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        let mut url = Url::parse(endpoint).map_err(|_| Error::EndpointUrl)?;
        if url.query().is_none() {
            url.set_query(Some(&format!("v={VOICE_GATEWAY_VERSION}")));
        }
        return Ok(url);
    }

    let endpoint = endpoint.strip_suffix(":80").unwrap_or(endpoint);

    Url::parse(&format!("wss://{endpoint}/?v={VOICE_GATEWAY_VERSION}")).or(Err(Error::EndpointUrl))
}

#[inline]
async fn init_secrets(
    client: &mut WsStream,
    mode: CryptoMode,
    ssrc: u32,
) -> Result<ConnectionSecrets> {
    loop {
        let Some(value) = client.recv_json().await? else {
            continue;
        };

        match value {
            GatewayEvent::SessionDescription(desc) => {
                if desc.mode != mode.to_request_str() {
                    return Err(Error::CryptoModeInvalid);
                }

                return ConnectionSecrets::new(mode, &desc.secret_key, ssrc);
            },
            other => {
                debug!("Expected ready for key; got: op{}.", other.kind() as u8);
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        driver::{
            test_impls::{gateway::*, *},
            VoiceConnection,
        },
        events::ConnectionEvent,
        model::payload::Hello,
        Config,
    };
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn urls_follow_endpoint_rules() {
        assert_eq!(
            generate_url("voice.example.com:80").unwrap().as_str(),
            "wss://voice.example.com/?v=4"
        );
        assert_eq!(
            generate_url("voice.example.com:443").unwrap().as_str(),
            "wss://voice.example.com:443/?v=4"
        );
        assert_eq!(
            generate_url("ws://127.0.0.1:9000").unwrap().as_str(),
            "ws://127.0.0.1:9000/?v=4"
        );
        assert!(generate_url("bad host name").is_err());
    }

    #[tokio::test]
    async fn handshake_then_resume_then_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        let (udp_addr, _udp) = udp_responder().await;

        let conn = VoiceConnection::new(Config::default());
        let events = conn.subscribe();

        let server = tokio::spawn(async move {
            let (mut ws, select) = identify(&listener, udp_addr).await;
            assert_eq!(select["d"]["mode"], "xsalsa20_poly1305_lite");
            assert_eq!(select["d"]["protocol"], "udp");
            assert_eq!(select["d"]["data"]["address"], "127.0.0.1");

            let speaking = recv_op(&mut ws).await;
            assert_eq!(speaking["op"], 5);
            assert_eq!(speaking["d"]["speaking"], 1);
            assert_eq!(speaking["d"]["ssrc"], TEST_SSRC);

            close(&mut ws, 4015).await;

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let resume = recv_op(&mut ws).await;
            assert_eq!(resume["op"], 7);
            assert_eq!(resume["d"]["session_id"], "test-session");

            send(&mut ws, &GatewayEvent::from(Hello {
                heartbeat_interval: 41_250.0,
            }))
            .await;
            send(&mut ws, &GatewayEvent::Resumed).await;

            // Give the client time to adopt the new socket before closing it for good.
            tokio::time::sleep(Duration::from_millis(200)).await;
            close(&mut ws, 4006).await;
        });

        conn.connect(test_info(endpoint)).await.unwrap();
        assert_eq!(conn.stage(), ConnectionStage::Ready);

        conn.set_speaking(true);

        wait_for_stage(&events, ConnectionStage::Resume).await;
        wait_for_stage(&events, ConnectionStage::Ready).await;
        wait_for_stage(&events, ConnectionStage::Close).await;

        let closed = loop {
            if let ConnectionEvent::Closed(code) = events.recv_async().await.unwrap() {
                break code;
            }
        };
        assert_eq!(closed, Some(4006));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn udp_failure_resumes_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        let (udp_addr, _udp) = udp_responder().await;

        let conn = VoiceConnection::new(Config::default());
        let events = conn.subscribe();

        let server = tokio::spawn(async move {
            let (first, _) = identify(&listener, udp_addr).await;

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let resume = recv_op(&mut ws).await;
            assert_eq!(resume["op"], 7);

            send(&mut ws, &GatewayEvent::from(Hello {
                heartbeat_interval: 41_250.0,
            }))
            .await;
            send(&mut ws, &GatewayEvent::Resumed).await;

            (first, ws)
        });

        conn.connect(test_info(endpoint)).await.unwrap();
        let idx = conn.shared().attempt_idx().unwrap();

        // As raised by the keepalive task when the media socket dies.
        conn.send(CoreMessage::UdpClosed(idx));

        wait_for_stage(&events, ConnectionStage::Resume).await;
        wait_for_stage(&events, ConnectionStage::Ready).await;
        let _sockets = server.await.unwrap();

        assert_eq!(conn.stage(), ConnectionStage::Ready);
        assert!(!events
            .drain()
            .any(|e| matches!(e, ConnectionEvent::Closed(_))));
    }

    #[tokio::test]
    async fn failed_resume_closes_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        let (udp_addr, _udp) = udp_responder().await;

        let conn = VoiceConnection::new(Config::default());
        let events = conn.subscribe();

        let server = tokio::spawn(async move {
            let (mut ws, _) = identify(&listener, udp_addr).await;

            // Nothing will accept the resume attempt.
            drop(listener);
            close(&mut ws, 4015).await;
        });

        conn.connect(test_info(endpoint)).await.unwrap();
        wait_for_stage(&events, ConnectionStage::Resume).await;

        let mut saw_error = false;
        let closed = loop {
            match events.recv_async().await.unwrap() {
                ConnectionEvent::Error(_) => saw_error = true,
                ConnectionEvent::Closed(code) => break code,
                _ => {},
            }
        };

        assert!(saw_error);
        assert_eq!(closed, Some(4015));
        assert_eq!(conn.stage(), ConnectionStage::Close);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_forced_mode_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());

        let conn = VoiceConnection::new(Config::default().crypto_mode(Some(CryptoMode::Suffix)));

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let _identify = recv_op(&mut ws).await;

            send(&mut ws, &GatewayEvent::from(Hello {
                heartbeat_interval: 41_250.0,
            }))
            .await;
            let mut ready = ready_payload();
            ready.modes = vec!["xsalsa20_poly1305_lite".into()];
            send(&mut ws, &GatewayEvent::from(ready)).await;

            // Hold the socket open until the client gives up.
            let _ = ws.next().await;
        });

        assert!(matches!(
            conn.connect(test_info(endpoint)).await,
            Err(e) if matches!(*e, Error::CryptoModeUnavailable)
        ));
        assert_eq!(conn.stage(), ConnectionStage::Close);
    }

    #[tokio::test]
    async fn rejoin_without_history_fails() {
        let conn = VoiceConnection::new(Config::default());
        assert!(matches!(
            conn.rejoin().await,
            Err(e) if matches!(*e, Error::NotConnected)
        ));
    }
}
