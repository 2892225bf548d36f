//! Peer connections.
//!
//! UDP has no connections, so each session keeps its own table. A peer only
//! enters it explicitly: a procedure handler on the listening side calls
//! [`Connections::accept`], the connecting side calls
//! [`Connections::open`]. After that every authentic datagram from the peer
//! refreshes it, and a peer silent for longer than the timeout is dropped.
//! The session sends heartbeats to every connected peer so that quiet links
//! stay up.
//!
//! Broadcasts reach connected peers only.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::{debug, info};

use crate::replication::NetEntityEvent;

/// Why a peer left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Nothing was heard from it within the timeout.
    TimedOut,
    /// Dropped through [`Connections::disconnect`].
    Closed,
}

/// Something that happened to the network state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    Connected(SocketAddr),
    Disconnected {
        peer: SocketAddr,
        reason: DisconnectReason,
    },
    Entity(NetEntityEvent),
}

/// Why [`Connections::accept`] turned a peer away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Refused {
    #[error("not accepting new connections")]
    NotAccepting,

    #[error("connection limit of {0} reached")]
    Full(usize),
}

/// The connected peers of one session, keyed by address.
#[derive(Debug)]
pub struct Connections {
    /// Tick each peer was last heard from.
    peers: BTreeMap<SocketAddr, u64>,
    events: Vec<NetEvent>,
    now: u64,
    timeout_ticks: u64,
    max_peers: usize,
    accept_incoming: bool,
}

impl Connections {
    /// Create an empty table that holds up to `max_peers` incoming peers
    /// and drops a peer after `timeout_ticks` silent ticks.
    #[must_use]
    pub fn new(max_peers: usize, timeout_ticks: u64) -> Self {
        Self {
            peers: BTreeMap::new(),
            events: Vec::new(),
            now: 0,
            timeout_ticks,
            max_peers,
            accept_incoming: true,
        }
    }

    /// Allow or refuse new incoming peers. Connected peers are kept.
    pub fn set_accept_incoming(&mut self, accept: bool) {
        self.accept_incoming = accept;
    }

    #[must_use]
    pub fn accepts_incoming(&self) -> bool {
        self.accept_incoming
    }

    #[must_use]
    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Admit an incoming peer. Returns `Ok(false)` if it was already
    /// connected.
    ///
    /// # Errors
    ///
    /// Returns [`Refused`] if incoming peers are switched off or the table
    /// is full.
    pub fn accept(&mut self, peer: SocketAddr) -> Result<bool, Refused> {
        if self.refresh(peer) {
            return Ok(false);
        }
        if !self.accept_incoming {
            debug!(%peer, "connection refused, not accepting");
            return Err(Refused::NotAccepting);
        }
        if self.peers.len() >= self.max_peers {
            debug!(%peer, max_peers = self.max_peers, "connection refused, full");
            return Err(Refused::Full(self.max_peers));
        }
        self.insert(peer);
        Ok(true)
    }

    /// Connect to `peer` from this side. Ignores the incoming limits.
    /// Returns `false` if it was already connected.
    pub fn open(&mut self, peer: SocketAddr) -> bool {
        if self.refresh(peer) {
            return false;
        }
        self.insert(peer);
        true
    }

    /// Mark `peer` as heard from this tick. Returns `false` if it is not
    /// connected.
    pub fn refresh(&mut self, peer: SocketAddr) -> bool {
        match self.peers.get_mut(&peer) {
            Some(last_heard) => {
                *last_heard = self.now;
                true
            }
            None => false,
        }
    }

    /// Drop `peer`. Returns `false` if it was not connected.
    pub fn disconnect(&mut self, peer: SocketAddr) -> bool {
        self.remove(peer, DisconnectReason::Closed)
    }

    #[must_use]
    pub fn is_connected(&self, peer: SocketAddr) -> bool {
        self.peers.contains_key(&peer)
    }

    /// Connected peers in address order.
    pub fn peers(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.peers.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Move the clock to `tick` and drop every peer silent for more than
    /// the timeout. Returns the dropped peers.
    pub fn advance(&mut self, tick: u64) -> Vec<SocketAddr> {
        self.now = tick;
        let expired: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|&(_, &last_heard)| tick.saturating_sub(last_heard) > self.timeout_ticks)
            .map(|(&peer, _)| peer)
            .collect();
        for &peer in &expired {
            self.remove(peer, DisconnectReason::TimedOut);
        }
        expired
    }

    /// Take the recorded events, oldest first.
    pub fn drain_events(&mut self) -> Vec<NetEvent> {
        std::mem::take(&mut self.events)
    }

    fn insert(&mut self, peer: SocketAddr) {
        self.peers.insert(peer, self.now);
        self.events.push(NetEvent::Connected(peer));
        info!(%peer, peers = self.peers.len(), "peer connected");
    }

    fn remove(&mut self, peer: SocketAddr, reason: DisconnectReason) -> bool {
        if self.peers.remove(&peer).is_none() {
            return false;
        }
        self.events.push(NetEvent::Disconnected { peer, reason });
        info!(%peer, ?reason, peers = self.peers.len(), "peer disconnected");
        true
    }
}
