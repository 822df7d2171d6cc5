//! UDP media transport and IP discovery.

use super::connection::error::{Error, Result};
use discortp::discord::{IpDiscoveryPacket, IpDiscoveryType, MutableIpDiscoveryPacket};
use std::{
    io::{Error as IoError, ErrorKind as IoErrorKind, Result as IoResult},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::UdpSocket, time::timeout};
use tracing::{debug, instrument, trace};

/// Size of both the IP discovery request and its response.
pub const DISCOVERY_PACKET_LEN: usize = IpDiscoveryPacket::const_packet_size();

/// A connected UDP socket to a voice server.
///
/// Clones share the same socket and close flag.
#[derive(Clone, Debug)]
pub struct UdpTransport {
    backing: Backing,
    closed: Arc<AtomicBool>,
}

#[derive(Clone, Debug)]
enum Backing {
    Socket(Arc<UdpSocket>),
    #[cfg(test)]
    Mock(flume::Sender<Vec<u8>>),
}

impl UdpTransport {
    /// Binds a local socket and connects it to the voice server at `ip:port`.
    #[instrument]
    pub async fn open(ip: IpAddr, port: u16) -> IoResult<Self> {
        let local: SocketAddr = match ip {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect((ip, port)).await?;

        Ok(Self {
            backing: Backing::Socket(Arc::new(socket)),
            closed: Arc::default(),
        })
    }

    /// A transport which hands every sent datagram to a channel.
    #[cfg(test)]
    pub(crate) fn mock(tx: flume::Sender<Vec<u8>>) -> Self {
        Self {
            backing: Backing::Mock(tx),
            closed: Arc::default(),
        }
    }

    /// Learns our externally visible address from the voice server.
    ///
    /// Sends one discovery request tagged with `ssrc`, then waits up to
    /// `wait` for a single reply.
    #[instrument(skip(self))]
    pub async fn discover_ip(&self, ssrc: u32, wait: Duration) -> Result<SocketAddr> {
        let Backing::Socket(socket) = &self.backing else {
            return Err(Error::IllegalDiscoveryResponse);
        };

        let mut bytes = [0u8; DISCOVERY_PACKET_LEN];
        {
            let mut view = MutableIpDiscoveryPacket::new(&mut bytes[..]).expect(
                "FATAL: discovery buffer is always the exact discovery packet size.",
            );
            view.set_pkt_type(IpDiscoveryType::Request);
            view.set_length(70);
            view.set_ssrc(ssrc);
        }

        socket.send(&bytes).await?;

        let len = timeout(wait, socket.recv(&mut bytes))
            .await
            .map_err(|_| Error::IpDiscoveryTimedOut)??;

        let addr = parse_discovery_response(&bytes[..len])?;
        debug!("Discovered external address {addr}.");

        Ok(addr)
    }

    /// Sends one datagram without waiting.
    ///
    /// A full socket buffer surfaces as [`IoErrorKind::WouldBlock`]; callers
    /// treat that as a dropped packet.
    pub fn send(&self, packet: &[u8]) -> IoResult<()> {
        if self.is_closed() {
            return Err(IoError::new(IoErrorKind::NotConnected, "transport closed"));
        }

        match &self.backing {
            Backing::Socket(s) => s.try_send(packet).map(|_| ()),
            #[cfg(test)]
            Backing::Mock(tx) => tx
                .send(packet.to_vec())
                .map_err(|_| IoError::from(IoErrorKind::BrokenPipe)),
        }
    }

    /// Marks this transport as closed by its owner.
    ///
    /// Send failures after this point are expected, and are not reported as an
    /// unexpected close.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            trace!("UDP transport closed.");
        }
    }

    /// Returns whether [`close`] has been called on any clone.
    ///
    /// [`close`]: UdpTransport::close
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Extracts the `{ip, port}` from an IP discovery response.
///
/// The address is a nul-terminated string at byte 8, and the port is a
/// big-endian `u16` in the final two bytes.
pub fn parse_discovery_response(bytes: &[u8]) -> Result<SocketAddr> {
    let view = IpDiscoveryPacket::new(bytes).ok_or(Error::IllegalDiscoveryResponse)?;

    if view.get_pkt_type() != IpDiscoveryType::Response {
        return Err(Error::IllegalDiscoveryResponse);
    }

    // UDP spoofing means we can't assume a "left edge" of '\0's,
    // so take the first one.
    let raw = view.get_address_raw();
    let nul_byte_index = raw.iter().position(|&b| b == 0).ok_or(Error::IllegalIp)?;

    let address_str = std::str::from_utf8(&raw[..nul_byte_index]).map_err(|_| Error::IllegalIp)?;
    let address = IpAddr::from_str(address_str).map_err(|_| Error::IllegalIp)?;

    Ok(SocketAddr::new(address, view.get_port()))
}
