//! Session configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use heist_net::rpc::DEFAULT_MAX_DATAGRAM;
use heist_net::sequence::DEFAULT_SEQUENCE_WINDOW;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default UDP port.
pub const DEFAULT_PORT: u16 = 7777;

/// The environment variable used to override the bind address.
pub const BIND_ADDR_ENV: &str = "HEIST_BIND_ADDR";

/// Highest accepted tick rate.
pub const MAX_TICK_RATE: f64 = 1000.0;

/// Default number of connected peers.
pub const DEFAULT_MAX_PEERS: usize = 16;

/// Default silence after which a peer is dropped.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time between two heartbeats to each peer.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(3300);

/// Configuration for one simulation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Human-readable session name (e.g. `"server"`), used in log output.
    pub name: String,
    /// Local address of the UDP endpoint.
    pub bind_addr: SocketAddr,
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
    /// Sequence numbers remembered per peer for duplicate suppression.
    pub sequence_window: usize,
    /// Largest datagram sent or accepted, checksum included.
    pub max_datagram: usize,
    /// Most peers connected at once.
    pub max_peers: usize,
    /// Whether new peers may connect.
    pub accept_incoming: bool,
    /// Silence after which a connected peer is dropped.
    pub peer_timeout: Duration,
    /// Time between two heartbeats to each connected peer.
    pub heartbeat_interval: Duration,
}

impl SessionConfig {
    /// Create a config with defaults. The bind address comes from
    /// `HEIST_BIND_ADDR` when it is set and valid, else
    /// `127.0.0.1:7777`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind_addr: bind_addr_from_env(),
            tick_rate: 60.0,
            max_ticks: 0,
            sequence_window: DEFAULT_SEQUENCE_WINDOW,
            max_datagram: DEFAULT_MAX_DATAGRAM,
            max_peers: DEFAULT_MAX_PEERS,
            accept_incoming: true,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Override the bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Override the tick rate.
    #[must_use]
    pub fn with_tick_rate(mut self, tick_rate: f64) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    /// Stop after `max_ticks` ticks (0 = never).
    #[must_use]
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Override the per-peer sequence window.
    #[must_use]
    pub fn with_sequence_window(mut self, window: usize) -> Self {
        self.sequence_window = window;
        self
    }

    /// Override the datagram size limit.
    #[must_use]
    pub fn with_max_datagram(mut self, max_datagram: usize) -> Self {
        self.max_datagram = max_datagram;
        self
    }

    /// Override the connection limit.
    #[must_use]
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Allow or refuse new peers.
    #[must_use]
    pub fn with_accept_incoming(mut self, accept: bool) -> Self {
        self.accept_incoming = accept;
        self
    }

    /// Override the peer timeout and heartbeat interval.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.peer_timeout = timeout;
        self
    }

    /// Time budget of one tick.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate)
    }

    /// Whole ticks covering `duration`, at least one.
    #[must_use]
    pub fn ticks_for(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.tick_rate).ceil().max(1.0) as u64
    }

    /// Check that the values can drive a session.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.tick_rate.is_finite() && self.tick_rate > 0.0 && self.tick_rate <= MAX_TICK_RATE,
            "tick_rate must be in (0, {MAX_TICK_RATE}], got {}",
            self.tick_rate
        );
        anyhow::ensure!(self.sequence_window > 0, "sequence_window must be non-zero");
        anyhow::ensure!(
            self.max_datagram > heist_net::integrity::CHECKSUM_LEN + heist_net::rpc::RPC_ID_LEN,
            "max_datagram of {} cannot hold a call header",
            self.max_datagram
        );
        anyhow::ensure!(self.max_peers > 0, "max_peers must be non-zero");
        anyhow::ensure!(
            self.ticks_for(self.heartbeat_interval) < self.ticks_for(self.peer_timeout),
            "heartbeat_interval {:?} must be shorter than peer_timeout {:?}",
            self.heartbeat_interval,
            self.peer_timeout
        );
        Ok(())
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

fn bind_addr_from_env() -> SocketAddr {
    match std::env::var(BIND_ADDR_ENV) {
        Ok(value) => value.parse().unwrap_or_else(|err| {
            warn!(
                var = BIND_ADDR_ENV,
                value = %value,
                error = %err,
                "invalid bind address, using default"
            );
            default_bind_addr()
        }),
        Err(_) => default_bind_addr(),
    }
}
