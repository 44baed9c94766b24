use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// This is the raw send primitive: sending a finished datagram to a peer. It is an abstraction
///  over the UDP socket, introduced to facilitate mocking the I/O part away for testing.
///
/// An error returned from here is fatal for the session on whose behalf the datagram was sent.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", datagram.len(), to);

        if let Err(e) = self.send_to(datagram, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
            return Err(e.into());
        }
        Ok(())
    }
}
