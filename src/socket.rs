//! Helpers to simplify work with UdpSocket.

use crate::message::Message;
use async_trait::async_trait;
use std::{io, net::SocketAddr};
use tokio::net::UdpSocket;

/// Largest datagram we expect to receive.
const MAX_DATAGRAM_LEN: usize = 65_535;

/// Datagram socket the DHT runs on. Implemented for `tokio::net::UdpSocket`; other
/// implementations can be used to route traffic through custom transports.
#[async_trait]
pub trait SocketTrait {
    async fn send_to(&self, buf: &[u8], target: &SocketAddr) -> io::Result<()>;
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

pub(crate) struct Socket(Box<dyn SocketTrait + Send + Sync + 'static>, SocketAddr);

impl Socket {
    pub fn new<S: SocketTrait + Send + Sync + 'static>(inner: S) -> io::Result<Self> {
        let inner = Box::new(inner);
        let local_addr = inner.local_addr()?;
        Ok(Self(inner, local_addr))
    }

    pub(crate) async fn send(&self, message: &Message, addr: SocketAddr) -> io::Result<()> {
        log::trace!("Sending to {addr:?} {message:?}");

        let bytes = message
            .encode()
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;

        // Note: if the socket fails to send the entire buffer, then there is no point in trying to
        // send the rest (no node will attempt to reassemble two or more datagrams into a
        // meaningful message).
        self.0.send_to(&bytes, &addr).await
    }

    /// Receive the next message that decodes. Requests that don't are answered with an error.
    pub(crate) async fn recv(&self) -> io::Result<(Message, SocketAddr)> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (size, addr) = self.0.recv_from(&mut buffer).await?;
            let input = &buffer[0..size];

            let error = match Message::decode(input) {
                Ok(message) => return Ok((message, addr)),
                Err(error) => error,
            };

            log::debug!("Failed to decode incoming message from {addr:?}: {error}");

            if let Some(reply) = Message::reject(input) {
                if let Err(error) = self.send(&reply, addr).await {
                    log::debug!("Failed to send error reply to {addr:?}: {error}");
                }
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.1
    }
}

#[async_trait]
impl SocketTrait for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: &SocketAddr) -> io::Result<()> {
        UdpSocket::send_to(self, buf, target).await.map(|_| ())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
