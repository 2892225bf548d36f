//! Outgoing datagram queue.
//!
//! Handlers and systems never touch the socket. They queue framed calls in
//! the [`Outbox`] resource and the runner sends them at the end of the tick.
//! Broadcasts are resolved then, against the peers connected at that point.

use std::net::SocketAddr;

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Peer(SocketAddr),
    Connected,
}

/// Framed datagrams waiting to be sent.
#[derive(Debug, Default)]
pub struct Outbox {
    queued: Vec<(Target, Vec<u8>)>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `datagram` for `target`.
    pub fn send_to(&mut self, target: SocketAddr, datagram: Vec<u8>) {
        self.queued.push((Target::Peer(target), datagram));
    }

    /// Queue `datagram` for every peer connected when the tick ends.
    pub fn broadcast(&mut self, datagram: &[u8]) {
        self.queued.push((Target::Connected, datagram.to_vec()));
    }

    /// Drop everything queued directly for `peer`. Returns how many
    /// datagrams were dropped.
    pub fn forget_peer(&mut self, peer: SocketAddr) -> usize {
        let before = self.queued.len();
        self.queued.retain(|(target, _)| *target != Target::Peer(peer));
        let dropped = before - self.queued.len();
        if dropped > 0 {
            trace!(%peer, dropped, "dropped queued datagrams");
        }
        dropped
    }

    /// Take every queued datagram, oldest first, sending broadcasts to each
    /// of `peers`.
    pub fn take(&mut self, peers: &[SocketAddr]) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut out = Vec::with_capacity(self.queued.len());
        for (target, datagram) in std::mem::take(&mut self.queued) {
            match target {
                Target::Peer(peer) => out.push((peer, datagram)),
                Target::Connected => {
                    out.extend(peers.iter().map(|&peer| (peer, datagram.clone())));
                }
            }
        }
        out
    }

    /// Number of queued entries, counting each broadcast once.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}
