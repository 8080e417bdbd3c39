//! UDP client for the upstream resolver

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::message::Header;

/// Largest datagram accepted from the upstream
pub const MAX_UDP_SIZE: usize = 4096;

/// Sends single queries to one upstream resolver
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        UpstreamClient { addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send `query` and wait for the reply carrying the same transaction id
    ///
    /// Every call uses its own socket, connected to the upstream, so only
    /// datagrams from the upstream address are seen. Replies with another id
    /// or too short to carry one are skipped until the timeout runs out.
    pub async fn query(&self, query: &[u8]) -> Result<Bytes> {
        let id = Header::read(query)?.id;

        let bind_addr = if self.addr.is_ipv6() {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.addr).await?;
        socket.send(query).await?;
        trace!(upstream = %self.addr, id, len = query.len(), "sent upstream query");

        match tokio::time::timeout(self.timeout, self.recv_matching(&socket, id)).await {
            Ok(reply) => reply,
            Err(_) => Err(Error::Timeout(self.timeout)),
        }
    }

    async fn recv_matching(&self, socket: &UdpSocket, id: u16) -> Result<Bytes> {
        let mut buf = vec![0u8; MAX_UDP_SIZE];
        loop {
            let len = socket.recv(&mut buf).await?;
            match Header::read(&buf[..len]) {
                Ok(header) if header.id == id => {
                    return Ok(Bytes::copy_from_slice(&buf[..len]));
                }
                Ok(header) => {
                    debug!(upstream = %self.addr, expected = id, got = header.id, "ignoring reply with mismatched id");
                }
                Err(e) => {
                    debug!(upstream = %self.addr, "ignoring malformed reply: {}", e);
                }
            }
        }
    }
}
