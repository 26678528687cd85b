use std::fmt;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::error::RelayError;

/// Relay metrics shared between the swarm task, the delivery thread and the
/// façade, registered for Prometheus text exposition.
pub struct RelayStats {
    published: Counter,
    received: Counter,
    delivered: Counter,
    forwarded: Counter,
    duplicates: Counter,
    looped: Counter,
    malformed: Counter,
    dropped_frames: Counter,
    evicted: Counter,
    dial_failures: Counter,
    listener_failures: Counter,
    peer_count: Gauge,
    registry: Registry,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages published by this node.
    pub published: u64,
    /// Publish frames received from peers.
    pub received: u64,
    /// Events handed to local listeners.
    pub delivered: u64,
    /// Frames forwarded on behalf of other peers.
    pub forwarded: u64,
    pub duplicates: u64,
    pub looped: u64,
    pub malformed: u64,
    /// Outbound frames dropped on queue overflow or send failure.
    pub dropped_frames: u64,
    /// Peers removed by the liveness check.
    pub evicted: u64,
    pub dial_failures: u64,
    /// Listener invocations that panicked.
    pub listener_failures: u64,
    /// Peers in the directory when the snapshot was taken.
    pub peers: i64,
}

macro_rules! counters {
    ($($name:ident => $field:ident, $metric:literal, $help:literal;)*) => {
        impl RelayStats {
            /// Create the metrics and register each under its `natter_*` name.
            pub fn new() -> Self {
                let mut registry = Registry::default();
                $(
                    let $field = Counter::default();
                    registry.register($metric, $help, $field.clone());
                )*
                let peer_count = Gauge::default();
                registry.register(
                    "natter_peer_count",
                    "Number of peers in the directory",
                    peer_count.clone(),
                );
                Self {
                    $($field,)*
                    peer_count,
                    registry,
                }
            }

            $(
                pub fn $name(&self) {
                    self.$field.inc();
                }
            )*

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.get(),)*
                    peers: self.peer_count.get(),
                }
            }
        }
    };
}

counters! {
    record_published => published, "natter_published", "Messages published by this node";
    record_received => received, "natter_received", "Publish frames received from peers";
    record_delivered => delivered, "natter_delivered", "Events handed to local listeners";
    record_forwarded => forwarded, "natter_forwarded", "Frames forwarded for other peers";
    record_duplicate => duplicates, "natter_duplicates", "Frames dropped as already seen";
    record_looped => looped, "natter_looped", "Frames carrying this node's own origin";
    record_malformed => malformed, "natter_malformed", "Frames that failed validation";
    record_dropped_frame => dropped_frames, "natter_dropped_frames", "Outbound frames dropped";
    record_evicted => evicted, "natter_evicted", "Peers removed by the liveness check";
    record_dial_failure => dial_failures, "natter_dial_failures", "Failed outbound dials";
    record_listener_failure => listener_failures, "natter_listener_failures", "Listener panics";
}

impl RelayStats {
    pub fn set_peer_count(&self, peers: usize) {
        self.peer_count.set(i64::try_from(peers).unwrap_or(i64::MAX));
    }

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, RelayError> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry).map_err(|e| {
            RelayError::Runtime {
                reason: format!("failed to encode metrics: {}", e),
            }
        })?;
        Ok(buf)
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RelayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RelayStats").field(&self.snapshot()).finish()
    }
}
