//! Host-facing surface of the chat node.
//!
//! [`ChatNode`] is an owned node with its own tokio runtime, for hosts that
//! have no async context. The free functions [`start`], [`set_listener`] and
//! [`send_message`] drive one process-wide `ChatNode` for bindings that can
//! only call plain functions.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use natter_relay::{
    default_bootstrap_path, BootstrapFile, DirectorySnapshot, Multiaddr, Node, PeerId, RelayConfig,
    RelayError,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub use natter_relay::{Event, EventListener, ListenerId, NodeState, StatsSnapshot};
pub use natter_types::constants::DEFAULT_TOPIC;

/// Install the tracing subscriber. Safe to call repeatedly; only the first
/// call has an effect.
pub fn init_logging() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
        {
            info!("logging initialized");
        }
    });
}

/// A chat node bundled with the runtime it runs on.
pub struct ChatNode {
    // Declared first so the node is dropped while the runtime is still alive.
    node: Node,
    runtime: Runtime,
}

impl ChatNode {
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("natter-runtime")
            .enable_all()
            .build()
            .map_err(|e| RelayError::Runtime {
                reason: format!("failed to build runtime: {}", e),
            })?;
        let node = Node::new(config)?;
        Ok(Self { node, runtime })
    }

    /// Start networking. Returns immediately.
    pub fn start(&self) -> Result<(), RelayError> {
        let _guard = self.runtime.enter();
        self.node.start()
    }

    pub fn set_listener(&self, listener: Arc<dyn EventListener>) {
        self.node.set_listener(listener);
    }

    pub fn add_listener(
        &self,
        topic: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<ListenerId, RelayError> {
        self.node.add_listener(topic, listener)
    }

    pub fn send_message(&self, topic: &str, message: &str) {
        self.node.send_message(topic, message);
    }

    pub fn subscribe(&self, topic: &str) -> Result<(), RelayError> {
        self.node.subscribe(topic)
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<(), RelayError> {
        self.node.unsubscribe(topic)
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.node.local_peer_id()
    }

    pub fn state(&self) -> NodeState {
        self.node.state()
    }

    pub fn peers(&self) -> Arc<DirectorySnapshot> {
        self.node.peers()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.node.stats()
    }

    /// The underlying node, for operations not mirrored here.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Block until the node listens, or `wait` elapses.
    pub fn wait_for_listen_addr(&self, wait: Duration) -> Result<Multiaddr, RelayError> {
        self.runtime.block_on(async {
            tokio::time::timeout(wait, self.node.wait_for_listen_addr())
                .await
                .map_err(|_| RelayError::NetworkError {
                    reason: format!("not listening after {:?}", wait),
                })?
        })
    }

    /// Stop networking and wait for it to wind down. Must not be called from
    /// inside a listener or an async context.
    pub fn shutdown(&self) -> Result<(), RelayError> {
        self.runtime.block_on(self.node.shutdown())
    }
}

struct Global {
    node: OnceLock<ChatNode>,
    listener: Mutex<Option<Arc<dyn EventListener>>>,
}

fn global() -> &'static Global {
    static GLOBAL: OnceLock<Global> = OnceLock::new();
    GLOBAL.get_or_init(|| Global {
        node: OnceLock::new(),
        listener: Mutex::new(None),
    })
}

fn pending_listener() -> MutexGuard<'static, Option<Arc<dyn EventListener>>> {
    global()
        .listener
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Configuration used by [`start`]: an OS-assigned port on all interfaces,
/// booting from `~/.natter/bootstrap.toml` when that file exists.
pub fn default_config() -> RelayConfig {
    let mut config = RelayConfig {
        listen_addr: ([0, 0, 0, 0], 0).into(),
        ..RelayConfig::default()
    };
    let path = default_bootstrap_path();
    if !path.exists() {
        info!(path = %path.display(), "no bootstrap file, waiting for inbound peers");
        return config;
    }
    match BootstrapFile::boot_node(&path) {
        Ok(addr) => {
            info!(path = %path.display(), %addr, "booting from bootstrap file");
            config.boot_nodes.push(addr);
        }
        Err(e) => warn!("ignoring bootstrap file: {}", e),
    }
    config
}

/// Start the process-wide node with [`default_config`].
pub fn start() -> Result<(), RelayError> {
    start_with(default_config())
}

/// Start the process-wide node. `config` is used only by the first call that
/// creates the node; later calls return `AlreadyStarted`.
pub fn start_with(config: RelayConfig) -> Result<(), RelayError> {
    init_logging();
    let state = global();
    if state.node.get().is_none() {
        let created = ChatNode::new(config)?;
        if state.node.set(created).is_err() {
            warn!("concurrent start: keeping the node created first");
        }
    }
    let Some(node) = state.node.get() else {
        return Err(RelayError::NotRunning);
    };
    if let Some(listener) = pending_listener().clone() {
        node.set_listener(listener);
    }
    node.start()?;
    node.subscribe(DEFAULT_TOPIC)?;
    info!(peer_id = %node.local_peer_id(), topic = DEFAULT_TOPIC, "chat node started");
    Ok(())
}

/// Install the catch-all listener, replacing any previous one. May be called
/// before [`start`].
pub fn set_listener(listener: Arc<dyn EventListener>) {
    *pending_listener() = Some(Arc::clone(&listener));
    if let Some(node) = global().node.get() {
        node.set_listener(listener);
    }
}

/// Publish a text message on `topic`. Never fails; problems are logged.
pub fn send_message(topic: &str, message: &str) {
    match global().node.get() {
        Some(node) => node.send_message(topic, message),
        None => warn!(topic, "send_message before start, message dropped"),
    }
}

/// Stop the process-wide node, if one was started.
pub fn shutdown() -> Result<(), RelayError> {
    match global().node.get() {
        Some(node) => node.shutdown(),
        None => Ok(()),
    }
}

/// The process-wide node's peer id, once created.
pub fn local_peer_id() -> Option<PeerId> {
    global().node.get().map(ChatNode::local_peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_idle() {
        let chat = ChatNode::new(RelayConfig::local()).unwrap();
        assert_eq!(chat.state(), NodeState::Idle);
        assert!(chat.peers().is_empty());
    }

    #[test]
    fn test_start_twice() {
        let chat = ChatNode::new(RelayConfig::local()).unwrap();
        chat.start().unwrap();
        assert!(matches!(chat.start(), Err(RelayError::AlreadyStarted)));
        chat.wait_for_listen_addr(Duration::from_secs(10)).unwrap();
        chat.shutdown().unwrap();
        assert_eq!(chat.state(), NodeState::Stopped);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RelayConfig {
            max_connections: 0,
            ..RelayConfig::local()
        };
        assert!(ChatNode::new(config).is_err());
    }

    #[test]
    fn test_default_topic_is_valid() {
        assert_eq!(DEFAULT_TOPIC, "chat-room");
        assert!(natter_types::primitives::Topic::new(DEFAULT_TOPIC).is_ok());
    }

    #[test]
    fn test_default_config_uses_any_port() {
        let config = default_config();
        assert_eq!(config.listen_addr.port(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_init_logging_idempotent() {
        init_logging();
        init_logging();
    }
}
