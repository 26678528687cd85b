use std::time::Duration;

// ─── Wire Parameters ─────────────────────────────────────────────────────────

/// Maximum topic name length in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Maximum payload carried by a single published message.
pub const MAX_PAYLOAD_SIZE: usize = 1_048_576; // 1 MB

/// Maximum encoded frame size (version byte + borsh body).
pub const MAX_FRAME_SIZE: usize = 2_097_152; // 2 MB

/// Topic used by the chat client and bootstrap node when none is given.
pub const DEFAULT_TOPIC: &str = "chat-room";

// ─── Network Parameters ──────────────────────────────────────────────────────

/// Default listen port.
pub const DEFAULT_PORT: u16 = 4701;

/// Maximum number of connected peers.
pub const MAX_CONNECTIONS: usize = 50;

/// Connections with no open streams are closed after this long.
pub const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Request-response timeout for a single frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between Kademlia bootstrap queries that look for more peers.
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);

// ─── Liveness ────────────────────────────────────────────────────────────────

/// Interval between heartbeats sent to idle peers.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A peer with no traffic for this long is evicted.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolution of the maintenance tick (dials, heartbeats, eviction).
pub const MAINTENANCE_TICK: Duration = Duration::from_millis(250);

// ─── Gossip Parameters ───────────────────────────────────────────────────────

/// Number of message ids remembered for local dedup.
pub const SEEN_CACHE_SIZE: usize = 8_192;

/// Number of message ids remembered per peer for forwarding suppression.
pub const PEER_SEEN_CACHE_SIZE: usize = 1_024;

/// Maximum number of frames queued for a single peer.
pub const MAX_PENDING_FRAMES: usize = 1_024;

/// Capacity of the event queues feeding listeners and event subscribers.
pub const EVENT_BUFFER: usize = 1_024;

// ─── Dial Backoff ────────────────────────────────────────────────────────────

/// Delay before the first redial.
pub const DIAL_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on the redial delay.
pub const DIAL_MAX_DELAY: Duration = Duration::from_secs(30);

/// Dial attempts before a target is marked unreachable.
pub const DIAL_MAX_ATTEMPTS: u32 = 6;
