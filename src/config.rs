//! Download configuration.
//!
//! [`DownloadConfig::default`] takes every value from [`crate::constants`];
//! the `with_*` methods override individual settings.

use std::net::SocketAddr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_PORT, HTTP_TRACKER_TIMEOUT, MAX_HASH_FAILURES, MAX_HASH_FAILURE_PEERS,
    MAX_PEERS_PER_TORRENT, MAX_PEER_CONNECT_ATTEMPTS, PEER_RETRY_DELAY, SHUTDOWN_GRACE,
    STALL_TIMEOUT, TICK_INTERVAL, TRACKER_MAX_ATTEMPTS, TRACKER_MIN_INTERVAL,
    TRACKER_RETRY_BASE_DELAY, TRACKER_RETRY_MAX_DELAY,
};
use crate::peer::{PeerId, SessionConfig};
use crate::piece::PickStrategy;
use crate::tracker::Backoff;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub peer_id: PeerId,
    /// Port reported to trackers. Nothing listens on it.
    pub port: u16,
    /// Concurrent peer sessions.
    pub max_peers: usize,
    pub session: SessionConfig,
    /// Addresses dialled before (and in addition to) any tracker peers.
    pub peers: Vec<SocketAddr>,
    pub strategy: PickStrategy,

    pub tracker_timeout: Duration,
    pub tracker_retry_base: Duration,
    pub tracker_retry_max: Duration,
    pub tracker_max_attempts: u32,
    /// Shortest wait between announces, used when the swarm runs dry.
    pub min_reannounce: Duration,

    /// How long the download may go without a verified piece while it has
    /// no useful peers.
    pub stall_timeout: Duration,
    pub max_hash_failures: u32,
    pub max_hash_failure_peers: usize,
    pub max_connect_attempts: u32,
    pub peer_retry_delay: Duration,
    pub tick_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            peer_id: PeerId::generate(),
            port: DEFAULT_PORT,
            max_peers: MAX_PEERS_PER_TORRENT,
            session: SessionConfig::default(),
            peers: Vec::new(),
            strategy: PickStrategy::default(),
            tracker_timeout: HTTP_TRACKER_TIMEOUT,
            tracker_retry_base: TRACKER_RETRY_BASE_DELAY,
            tracker_retry_max: TRACKER_RETRY_MAX_DELAY,
            tracker_max_attempts: TRACKER_MAX_ATTEMPTS,
            min_reannounce: TRACKER_MIN_INTERVAL,
            stall_timeout: STALL_TIMEOUT,
            max_hash_failures: MAX_HASH_FAILURES,
            max_hash_failure_peers: MAX_HASH_FAILURE_PEERS,
            max_connect_attempts: MAX_PEER_CONNECT_ATTEMPTS,
            peer_retry_delay: PEER_RETRY_DELAY,
            tick_interval: TICK_INTERVAL,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

impl DownloadConfig {
    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = peer_id;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers.max(1);
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Adds an address to dial regardless of what trackers return.
    pub fn with_peer(mut self, addr: SocketAddr) -> Self {
        self.peers.push(addr);
        self
    }

    pub fn with_strategy(mut self, strategy: PickStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_tracker_timeout(mut self, timeout: Duration) -> Self {
        self.tracker_timeout = timeout;
        self
    }

    pub fn with_tracker_retry(mut self, base: Duration, max: Duration, attempts: u32) -> Self {
        self.tracker_retry_base = base;
        self.tracker_retry_max = max;
        self.tracker_max_attempts = attempts;
        self
    }

    pub fn with_min_reannounce(mut self, interval: Duration) -> Self {
        self.min_reannounce = interval;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_hash_budget(mut self, max_failures: u32, max_peers: usize) -> Self {
        self.max_hash_failures = max_failures;
        self.max_hash_failure_peers = max_peers;
        self
    }

    pub fn with_peer_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_connect_attempts = max_attempts;
        self.peer_retry_delay = delay;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// A fresh retry schedule for one tracker.
    pub fn tracker_backoff(&self) -> Backoff {
        Backoff::new(
            self.tracker_retry_base,
            self.tracker_retry_max,
            self.tracker_max_attempts,
        )
    }
}
