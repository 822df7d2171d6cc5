use super::message::*;
use crate::{constants::*, driver::udp::UdpTransport};
use discortp::discord::MutableKeepalivePacket;
use flume::Sender;
use std::io::ErrorKind as IoErrorKind;
use tokio::time::{sleep_until, Instant};
use tracing::{error, instrument, trace};

/// Sends a keepalive datagram every [`UDP_KEEPALIVE_GAP`].
///
/// A failed send on a transport nobody closed is reported to the core task,
/// which treats it as the socket closing unexpectedly.
struct UdpKeepalive {
    ssrc: u32,
    udp: UdpTransport,
    attempt_idx: usize,
    core: Sender<CoreMessage>,
}

impl UdpKeepalive {
    async fn run(&mut self) {
        let mut keepalive_bytes = [0u8; MutableKeepalivePacket::minimum_packet_size()];
        {
            let mut ka = MutableKeepalivePacket::new(&mut keepalive_bytes[..])
                .expect("FATAL: Insufficient bytes given to keepalive packet.");
            ka.set_ssrc(self.ssrc);
        }

        let mut ka_time = Instant::now() + UDP_KEEPALIVE_GAP;

        loop {
            sleep_until(ka_time).await;
            ka_time += UDP_KEEPALIVE_GAP;

            if self.udp.is_closed() {
                break;
            }

            trace!("Sending UDP Keepalive.");
            match self.udp.send(&keepalive_bytes[..]) {
                Ok(()) => {},
                Err(e) if e.kind() == IoErrorKind::WouldBlock => {},
                Err(e) => {
                    if !self.udp.is_closed() {
                        error!("Fatal UDP keepalive send error: {:?}.", e);
                        drop(self.core.send(CoreMessage::UdpClosed(self.attempt_idx)));
                    }
                    break;
                },
            }
        }
    }
}

#[instrument(skip(udp, core))]
pub(crate) async fn runner(
    udp: UdpTransport,
    ssrc: u32,
    attempt_idx: usize,
    core: Sender<CoreMessage>,
) {
    trace!("UDP keepalive handle started.");

    let mut keepalive = UdpKeepalive {
        ssrc,
        udp,
        attempt_idx,
        core,
    };

    keepalive.run().await;

    trace!("UDP keepalive handle stopped.");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::test_impls::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn keepalives_carry_ssrc() {
        let (udp, rx) = mock_udp();
        let (core_tx, _core_rx) = flume::unbounded();

        let task = tokio::spawn(runner(udp.clone(), 0xAABB_CCDD, 0, core_tx));

        tokio::time::sleep(UDP_KEEPALIVE_GAP * 2 + Duration::from_millis(10)).await;
        let sent: Vec<_> = rx.drain().collect();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0][..4], [0xAA, 0xBB, 0xCC, 0xDD]);

        udp.close();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_failure_is_reported() {
        let (udp, rx) = mock_udp();
        let (core_tx, core_rx) = flume::unbounded();
        drop(rx);

        runner(udp, 1, 7, core_tx).await;

        assert!(matches!(core_rx.try_recv(), Ok(CoreMessage::UdpClosed(7))));
    }

    #[tokio::test(start_paused = true)]
    async fn owner_close_is_silent() {
        let (udp, _rx) = mock_udp();
        let (core_tx, core_rx) = flume::unbounded();
        udp.close();

        runner(udp, 1, 7, core_tx).await;

        assert!(core_rx.is_empty());
    }
}
