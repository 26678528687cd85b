use std::net::SocketAddr;
use std::time::Duration;

use natter_types::constants::{
    DEFAULT_PORT, DIAL_BASE_DELAY, DISCOVERY_INTERVAL, DIAL_MAX_ATTEMPTS, DIAL_MAX_DELAY, EVENT_BUFFER,
    HEARTBEAT_INTERVAL, IDLE_CONNECTION_TIMEOUT, LIVENESS_TIMEOUT, MAX_CONNECTIONS,
    MAX_PENDING_FRAMES, PEER_SEEN_CACHE_SIZE, SEEN_CACHE_SIZE,
};

use crate::error::RelayError;

/// Configuration for a relay node.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Bootstrap node addresses (multiaddr strings).
    pub boot_nodes: Vec<String>,
    /// Maximum number of connected peers.
    pub max_connections: usize,
    /// Optional keypair seed (32 bytes). If None, generates random.
    pub keypair_seed: Option<[u8; 32]>,
    /// Discover peers on the local network via mDNS.
    pub enable_mdns: bool,
    /// Discover peers of peers through a Kademlia routing table.
    pub enable_kad: bool,
    /// Interval between Kademlia bootstrap queries.
    pub discovery_interval: Duration,
    /// Interval between heartbeats to idle peers.
    pub heartbeat_interval: Duration,
    /// Peers silent for longer than this are evicted.
    pub liveness_timeout: Duration,
    /// Idle timeout handed to the swarm.
    pub idle_connection_timeout: Duration,
    /// Capacity of the local dedup cache.
    pub seen_cache_size: usize,
    /// Capacity of each per-peer recent-id cache.
    pub peer_seen_cache_size: usize,
    /// Frames queued per peer before new ones are dropped.
    pub max_pending_frames: usize,
    /// Capacity of the listener and event-subscriber queues.
    pub event_buffer: usize,
    /// Redial schedule for boot and discovered addresses.
    pub dial_backoff: BackoffConfig,
}

/// Exponential backoff parameters for redialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempts (including the first dial) before giving up.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: DIAL_BASE_DELAY,
            max_delay: DIAL_MAX_DELAY,
            max_attempts: DIAL_MAX_ATTEMPTS,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            boot_nodes: Vec::new(),
            max_connections: MAX_CONNECTIONS,
            keypair_seed: None,
            enable_mdns: false,
            enable_kad: true,
            discovery_interval: DISCOVERY_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            liveness_timeout: LIVENESS_TIMEOUT,
            idle_connection_timeout: IDLE_CONNECTION_TIMEOUT,
            seen_cache_size: SEEN_CACHE_SIZE,
            peer_seen_cache_size: PEER_SEEN_CACHE_SIZE,
            max_pending_frames: MAX_PENDING_FRAMES,
            event_buffer: EVENT_BUFFER,
            dial_backoff: BackoffConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Loopback config on an OS-assigned port, handy for tests and local demos.
    pub fn local() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 0).into(),
            ..Self::default()
        }
    }

    /// Check the invariants the node relies on.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_connections == 0 {
            return Err(config_error("max_connections must be at least 1"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(config_error("heartbeat_interval must be non-zero"));
        }
        if self.liveness_timeout <= self.heartbeat_interval {
            return Err(config_error(
                "liveness_timeout must be longer than heartbeat_interval",
            ));
        }
        if self.seen_cache_size == 0 || self.peer_seen_cache_size == 0 {
            return Err(config_error("seen cache sizes must be at least 1"));
        }
        if self.max_pending_frames == 0 || self.event_buffer == 0 {
            return Err(config_error(
                "max_pending_frames and event_buffer must be at least 1",
            ));
        }
        if self.enable_kad && self.discovery_interval.is_zero() {
            return Err(config_error("discovery_interval must be non-zero"));
        }
        if self.dial_backoff.max_attempts == 0 {
            return Err(config_error("dial_backoff.max_attempts must be at least 1"));
        }
        if self.dial_backoff.base_delay > self.dial_backoff.max_delay {
            return Err(config_error(
                "dial_backoff.base_delay must not exceed max_delay",
            ));
        }
        Ok(())
    }
}

fn config_error(reason: &str) -> RelayError {
    RelayError::ConfigError {
        reason: reason.to_string(),
    }
}
