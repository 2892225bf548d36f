//! Per-peer duplicate suppression.
//!
//! The transport gives no delivery guarantees, so a datagram may arrive
//! twice. Procedures that must run at most once per logical message carry a
//! sequence number in their arguments and ask a [`SequenceFilter`] (kept as
//! a resource) whether that number was already seen from the caller.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::trace;

use crate::recycling::RecyclingSet;

/// Default number of recent sequence numbers remembered per peer.
pub const DEFAULT_SEQUENCE_WINDOW: usize = 256;

/// Recent sequence numbers, per sending peer.
#[derive(Debug, Clone)]
pub struct SequenceFilter {
    window: usize,
    peers: HashMap<SocketAddr, RecyclingSet<u64>>,
}

impl Default for SequenceFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SEQUENCE_WINDOW)
    }
}

impl SequenceFilter {
    /// Create a filter remembering `window` sequence numbers per peer.
    ///
    /// # Panics
    ///
    /// Panics if `window` is zero.
    #[must_use]
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "sequence window must be non-zero");
        Self {
            window,
            peers: HashMap::new(),
        }
    }

    /// Record `sequence` from `peer`. Returns `false` if it was already seen
    /// recently, in which case the message should be dropped.
    pub fn accept(&mut self, peer: SocketAddr, sequence: impl Into<u64>) -> bool {
        let sequence = sequence.into();
        let seen = self
            .peers
            .entry(peer)
            .or_insert_with(|| RecyclingSet::new(self.window));
        if seen.contains(&sequence) {
            trace!(%peer, sequence, "duplicate sequence");
            return false;
        }
        seen.add(sequence);
        true
    }

    /// Returns `true` if `sequence` from `peer` was seen recently.
    #[must_use]
    pub fn was_seen(&self, peer: SocketAddr, sequence: impl Into<u64>) -> bool {
        let sequence = sequence.into();
        self.peers
            .get(&peer)
            .is_some_and(|seen| seen.contains(&sequence))
    }

    /// Drop everything remembered about `peer`.
    pub fn forget(&mut self, peer: SocketAddr) -> bool {
        self.peers.remove(&peer).is_some()
    }

    /// Number of peers with remembered sequences.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Sequence numbers remembered per peer.
    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let mut filter = SequenceFilter::new(4);
        assert!(filter.accept(addr(1), 1_u8));
        assert!(!filter.accept(addr(1), 1_u8));
        assert!(filter.was_seen(addr(1), 1_u8));
    }

    #[test]
    fn test_peers_are_independent() {
        let mut filter = SequenceFilter::new(4);
        assert!(filter.accept(addr(1), 9_u32));
        assert!(filter.accept(addr(2), 9_u32));
        assert_eq!(filter.peer_count(), 2);
        assert!(filter.forget(addr(1)));
        assert!(filter.accept(addr(1), 9_u32));
    }

    #[test]
    fn test_old_sequences_fall_out_of_window() {
        let mut filter = SequenceFilter::new(2);
        for seq in 0_u16..3 {
            assert!(filter.accept(addr(1), seq));
        }
        assert!(!filter.was_seen(addr(1), 0_u16));
        assert!(filter.accept(addr(1), 0_u16));
    }
}
