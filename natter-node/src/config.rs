use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use natter_relay::{BackoffConfig, BootstrapFile, RelayConfig};
use natter_types::constants::{
    DEFAULT_PORT, DEFAULT_TOPIC, DIAL_BASE_DELAY, DIAL_MAX_ATTEMPTS, DIAL_MAX_DELAY,
    EVENT_BUFFER, HEARTBEAT_INTERVAL, LIVENESS_TIMEOUT, MAX_CONNECTIONS, MAX_PENDING_FRAMES,
    PEER_SEEN_CACHE_SIZE, SEEN_CACHE_SIZE,
};
use natter_types::primitives::validate_topic;

use crate::error::NodeError;

/// Name of the file written by `natter init`.
pub const CONFIG_FILE: &str = "natter.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub gossip: GossipConfig,
    #[serde(default)]
    pub dial: DialConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_addr: String,
    pub boot_nodes: Vec<String>,
    pub max_connections: usize,
    /// Discover peers on the local network.
    pub enable_mdns: bool,
    /// Discover peers of connected peers through Kademlia.
    pub enable_kad: bool,
    /// Hex-encoded 32-byte seed for a stable peer id.
    pub keypair_seed: Option<String>,
    /// Bootstrap file written by `natter bootstrap`.
    pub bootstrap_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Topic joined by `natter run`.
    pub topic: String,
    pub heartbeat_interval_ms: u64,
    pub liveness_timeout_ms: u64,
    pub seen_cache_size: usize,
    pub peer_seen_cache_size: usize,
    pub max_pending_frames: usize,
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            boot_nodes: Vec::new(),
            max_connections: MAX_CONNECTIONS,
            enable_mdns: false,
            enable_kad: true,
            keypair_seed: None,
            bootstrap_file: None,
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            heartbeat_interval_ms: HEARTBEAT_INTERVAL.as_millis() as u64,
            liveness_timeout_ms: LIVENESS_TIMEOUT.as_millis() as u64,
            seen_cache_size: SEEN_CACHE_SIZE,
            peer_seen_cache_size: PEER_SEEN_CACHE_SIZE,
            max_pending_frames: MAX_PENDING_FRAMES,
            event_buffer: EVENT_BUFFER,
        }
    }
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DIAL_BASE_DELAY.as_millis() as u64,
            max_delay_ms: DIAL_MAX_DELAY.as_millis() as u64,
            max_attempts: DIAL_MAX_ATTEMPTS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        let config: NodeConfig = toml::from_str(&contents).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to parse config file '{}': {}", path, e),
        })?;
        Ok(config)
    }

    /// Load `path` if given, else `natter.toml` in the working directory if
    /// present, else defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self, NodeError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).exists() => Self::load(CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    /// Initialize a default configuration file in the given directory.
    pub fn init(dir: &str) -> Result<PathBuf, NodeError> {
        let dir_path = Path::new(dir);
        if !dir_path.exists() {
            std::fs::create_dir_all(dir_path)?;
        }

        let config = NodeConfig::default();
        let toml_str = toml::to_string_pretty(&config).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to serialize default config: {}", e),
        })?;

        let config_path = dir_path.join(CONFIG_FILE);
        std::fs::write(&config_path, toml_str)?;

        Ok(config_path)
    }

    /// Translate into the networking core's configuration.
    pub fn to_relay_config(&self) -> Result<RelayConfig, NodeError> {
        let listen_addr: SocketAddr =
            self.network
                .listen_addr
                .parse()
                .map_err(|e| NodeError::ConfigError {
                    reason: format!("invalid listen_addr '{}': {}", self.network.listen_addr, e),
                })?;
        validate_topic(&self.gossip.topic).map_err(|e| NodeError::ConfigError {
            reason: format!("invalid gossip.topic: {}", e),
        })?;

        let mut boot_nodes = self.network.boot_nodes.clone();
        if let Some(path) = &self.network.bootstrap_file {
            boot_nodes.push(BootstrapFile::boot_node(path)?);
        }

        let keypair_seed = self
            .network
            .keypair_seed
            .as_deref()
            .map(parse_seed)
            .transpose()?;

        let config = RelayConfig {
            listen_addr,
            boot_nodes,
            max_connections: self.network.max_connections,
            keypair_seed,
            enable_mdns: self.network.enable_mdns,
            enable_kad: self.network.enable_kad,
            heartbeat_interval: Duration::from_millis(self.gossip.heartbeat_interval_ms),
            liveness_timeout: Duration::from_millis(self.gossip.liveness_timeout_ms),
            seen_cache_size: self.gossip.seen_cache_size,
            peer_seen_cache_size: self.gossip.peer_seen_cache_size,
            max_pending_frames: self.gossip.max_pending_frames,
            event_buffer: self.gossip.event_buffer,
            dial_backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.dial.base_delay_ms),
                max_delay: Duration::from_millis(self.dial.max_delay_ms),
                max_attempts: self.dial.max_attempts,
            },
            ..RelayConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse a hex-encoded 32-byte keypair seed.
pub fn parse_seed(hex_seed: &str) -> Result<[u8; 32], NodeError> {
    let bytes = hex::decode(hex_seed.trim()).map_err(|e| NodeError::ConfigError {
        reason: format!("invalid keypair seed hex: {}", e),
    })?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| NodeError::ConfigError {
        reason: format!("keypair seed must be 32 bytes, got {}", bytes.len()),
    })
}
