//! UDP socket wrapper.
//!
//! Receiving is polled: [`Endpoint::drain`] takes every datagram already
//! queued on the socket and returns without waiting, so the tick loop never
//! blocks on the network.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::error::NetError;

/// A datagram read from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Where it came from.
    pub from: SocketAddr,
    /// The raw bytes, checksum included.
    pub bytes: Vec<u8>,
}

/// A bound UDP socket with a reusable receive buffer.
#[derive(Debug)]
pub struct Endpoint {
    socket: UdpSocket,
    buffer: Vec<u8>,
    max_datagram: usize,
}

impl Endpoint {
    /// Bind to `addr`. Incoming datagrams larger than `max_datagram` bytes
    /// are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the socket cannot be bound.
    pub async fn bind(addr: SocketAddr, max_datagram: usize) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr).await?;
        info!(addr = %socket.local_addr()?, "endpoint bound");
        Ok(Self {
            socket,
            // one spare byte tells an oversized datagram from an exact fit
            buffer: vec![0; max_datagram + 1],
            max_datagram,
        })
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }

    /// Take every datagram currently queued, without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] on a socket error other than "nothing to
    /// read".
    pub fn drain(&mut self) -> Result<Vec<Datagram>, NetError> {
        let mut received = Vec::new();
        loop {
            match self.socket.try_recv_from(&mut self.buffer) {
                Ok((len, from)) if len > self.max_datagram => {
                    debug!(%from, len, limit = self.max_datagram, "dropping oversized datagram");
                }
                Ok((len, from)) => received.push(Datagram {
                    from,
                    bytes: self.buffer[..len].to_vec(),
                }),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from an earlier send surfaces here on some platforms
                Err(err) if err.kind() == io::ErrorKind::ConnectionReset => {
                    debug!(error = %err, "ignoring connection reset");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(received)
    }

    /// Wait until the socket has something to read.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the socket fails.
    pub async fn readable(&self) -> Result<(), NetError> {
        Ok(self.socket.readable().await?)
    }

    /// Send one datagram to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the send fails.
    pub async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<(), NetError> {
        let sent = self.socket.send_to(datagram, target).await?;
        if sent != datagram.len() {
            debug!(%target, sent, len = datagram.len(), "datagram truncated on send");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn loopback(max_datagram: usize) -> Endpoint {
        Endpoint::bind(SocketAddr::from(([127, 0, 0, 1], 0)), max_datagram)
            .await
            .unwrap()
    }

    async fn drain_eventually(endpoint: &mut Endpoint, expected: usize) -> Vec<Datagram> {
        let mut all = Vec::new();
        for _ in 0..50 {
            all.extend(endpoint.drain().unwrap());
            if all.len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        all
    }

    #[tokio::test]
    async fn test_drain_on_idle_socket_is_empty() {
        let mut endpoint = loopback(64).await;
        assert!(endpoint.drain().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_and_drain() {
        let sender = loopback(64).await;
        let mut receiver = loopback(64).await;
        let target = receiver.local_addr().unwrap();

        sender.send_to(b"one", target).await.unwrap();
        sender.send_to(b"two", target).await.unwrap();

        let got = drain_eventually(&mut receiver, 2).await;
        let bytes: Vec<&[u8]> = got.iter().map(|d| d.bytes.as_slice()).collect();
        assert_eq!(bytes, vec![&b"one"[..], &b"two"[..]]);
        assert!(got.iter().all(|d| d.from == sender.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_dropped() {
        let sender = loopback(64).await;
        let mut receiver = loopback(4).await;
        let target = receiver.local_addr().unwrap();

        sender.send_to(&[0; 5], target).await.unwrap();
        sender.send_to(&[1; 4], target).await.unwrap();

        let got = drain_eventually(&mut receiver, 1).await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].bytes, vec![1; 4]);
    }
}
