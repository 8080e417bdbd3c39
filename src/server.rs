//! UDP listener handing each datagram to the forwarder

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::forwarder::Forwarder;
use crate::upstream::MAX_UDP_SIZE;

/// Pause after the first receive error, doubled for each one after it
const RECV_BACKOFF_START: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

fn recv_backoff(consecutive_errors: u32) -> Duration {
    let factor = 1u32 << consecutive_errors.saturating_sub(1).min(16);
    RECV_BACKOFF_START.saturating_mul(factor).min(RECV_BACKOFF_MAX)
}

pub struct Server {
    socket: Arc<UdpSocket>,
    forwarder: Arc<Forwarder>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, forwarder: Forwarder) -> Result<Server> {
        let socket = UdpSocket::bind(addr).await?;

        Ok(Server {
            socket: Arc::new(socket),
            forwarder: Arc::new(forwarder),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve until `shutdown` completes. Each datagram gets its own task.
    /// Receive errors are logged and the loop backs off before retrying.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!("listening on {}", self.local_addr()?);

        tokio::pin!(shutdown);
        let mut buf = vec![0u8; MAX_UDP_SIZE];
        let mut recv_errors = 0u32;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            recv_errors = 0;
                            debug!(client = %src, len, "received query");
                            let datagram = Bytes::copy_from_slice(&buf[..len]);
                            let socket = self.socket.clone();
                            let forwarder = self.forwarder.clone();

                            tokio::spawn(async move {
                                handle_datagram(&socket, &forwarder, datagram, src).await;
                            });
                        }
                        Err(e) => {
                            recv_errors = recv_errors.saturating_add(1);
                            let pause = recv_backoff(recv_errors);
                            error!(consecutive = recv_errors, "recv error, pausing {:?}: {}", pause, e);
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Reply to one client datagram, or drop it
async fn handle_datagram(
    socket: &UdpSocket,
    forwarder: &Forwarder,
    datagram: Bytes,
    src: SocketAddr,
) {
    let reply = match forwarder.handle(&datagram).await {
        Ok(reply) => reply,
        Err(Error::Format(e)) => {
            warn!(client = %src, "dropping malformed query: {}", e);
            return;
        }
        Err(e @ Error::NotAQuery(_)) => {
            debug!(client = %src, "dropping datagram: {}", e);
            return;
        }
        Err(e) => {
            warn!(client = %src, "dropping query: {}", e);
            return;
        }
    };

    match socket.send_to(&reply, src).await {
        Ok(_) => debug!(client = %src, len = reply.len(), "sent response"),
        Err(e) => warn!(client = %src, "failed to send response: {}", e),
    }
}
