use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use natter_types::network::Envelope;
use natter_types::primitives::{MessageId, Topic};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::directory::DirectorySnapshot;
use crate::error::RelayError;
use crate::listener::{spawn_delivery, Event, EventListener, ListenerId, ListenerRegistry};
use crate::relay::{unix_millis, Command, RelayChannels, RelayNode};
use crate::stats::{RelayStats, StatsSnapshot};
use crate::transport::{build_swarm, load_keypair, socket_multiaddr};

/// Lifecycle of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => NodeState::Idle,
            1 => NodeState::Starting,
            2 => NodeState::Running,
            3 => NodeState::Stopping,
            _ => NodeState::Stopped,
        }
    }
}

/// Channel ends handed to the swarm task on start.
struct Startup {
    commands: mpsc::UnboundedReceiver<Command>,
    peers: watch::Sender<Arc<DirectorySnapshot>>,
    listen_addrs: watch::Sender<Vec<Multiaddr>>,
}

/// A chat node: the public entry point of the networking core.
///
/// All methods take `&self` and may be called from any thread. Networking
/// runs on a task spawned onto the caller's tokio runtime by [`Node::start`];
/// listeners run on a dedicated delivery thread.
pub struct Node {
    config: RelayConfig,
    keypair: Keypair,
    local_peer_id: PeerId,
    state: AtomicU8,
    sequence: AtomicU64,
    commands: mpsc::UnboundedSender<Command>,
    startup: Mutex<Option<Startup>>,
    listeners: Arc<ListenerRegistry>,
    stats: Arc<RelayStats>,
    events: broadcast::Sender<Event>,
    peers: watch::Receiver<Arc<DirectorySnapshot>>,
    listen_addrs: watch::Receiver<Vec<Multiaddr>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    delivery: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Node {
    /// Validate `config` and derive the node identity. Nothing touches the
    /// network until [`Node::start`].
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let keypair = load_keypair(config.keypair_seed)?;
        let local_peer_id = keypair.public().to_peer_id();

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (peers_tx, peers) = watch::channel(Arc::new(DirectorySnapshot::default()));
        let (listen_tx, listen_addrs) = watch::channel(Vec::new());
        let (events, _) = broadcast::channel(config.event_buffer);

        Ok(Self {
            keypair,
            local_peer_id,
            state: AtomicU8::new(NodeState::Idle as u8),
            // Seeded from the clock so a restarted node with a fixed key
            // does not reuse message ids.
            sequence: AtomicU64::new(unix_millis().saturating_mul(1_000)),
            commands,
            startup: Mutex::new(Some(Startup {
                commands: command_rx,
                peers: peers_tx,
                listen_addrs: listen_tx,
            })),
            listeners: Arc::new(ListenerRegistry::new()),
            stats: Arc::new(RelayStats::default()),
            events,
            peers,
            listen_addrs,
            task: Mutex::new(None),
            delivery: Mutex::new(None),
            config,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Start networking on the current tokio runtime. Returns once the swarm
    /// task and delivery thread are spawned; it does not wait for peers.
    pub fn start(&self) -> Result<(), RelayError> {
        if let Err(current) = self.state.compare_exchange(
            NodeState::Idle as u8,
            NodeState::Starting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match NodeState::from_u8(current) {
                NodeState::Starting | NodeState::Running => RelayError::AlreadyStarted,
                _ => RelayError::NotRunning,
            });
        }

        match self.launch() {
            Ok(()) => {
                self.state
                    .store(NodeState::Running as u8, Ordering::Release);
                info!(
                    peer_id = %self.local_peer_id,
                    listen = %self.config.listen_addr,
                    "node started"
                );
                Ok(())
            }
            Err(e) => {
                self.state.store(NodeState::Idle as u8, Ordering::Release);
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<(), RelayError> {
        let runtime = Handle::try_current().map_err(|e| RelayError::Runtime {
            reason: format!("start must be called within a tokio runtime: {}", e),
        })?;

        let mut swarm = build_swarm(self.keypair.clone(), &self.config)?;
        swarm
            .listen_on(socket_multiaddr(self.config.listen_addr))
            .map_err(|e| RelayError::NetworkError {
                reason: format!("listen: {}", e),
            })?;

        let (delivery_tx, delivery_rx) = mpsc::channel(self.config.event_buffer);
        let delivery = spawn_delivery(
            delivery_rx,
            Arc::clone(&self.listeners),
            Arc::clone(&self.stats),
        )?;

        let startup = lock(&self.startup)
            .take()
            .ok_or(RelayError::AlreadyStarted)?;
        let relay = RelayNode::new(
            self.config.clone(),
            swarm,
            RelayChannels {
                commands: startup.commands,
                delivery: delivery_tx,
                events: self.events.clone(),
                peers: startup.peers,
                listen_addrs: startup.listen_addrs,
                stats: Arc::clone(&self.stats),
            },
        );

        *lock(&self.task) = Some(runtime.spawn(relay.run()));
        *lock(&self.delivery) = Some(delivery);
        Ok(())
    }

    /// Replace the catch-all listener.
    pub fn set_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.set_default(listener);
    }

    /// Register a listener for one topic.
    pub fn add_listener(
        &self,
        topic: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<ListenerId, RelayError> {
        let topic = Topic::new(topic)?;
        Ok(self.listeners.add(topic, listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Receive every delivered event on a channel instead of a callback.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Subscribe to `topic`. Before start the request is queued.
    pub fn subscribe(&self, topic: &str) -> Result<(), RelayError> {
        let topic = Topic::new(topic)?;
        self.send_command(Command::Subscribe(topic))
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<(), RelayError> {
        let topic = Topic::new(topic)?;
        self.send_command(Command::Unsubscribe(topic))
    }

    /// Dial `addr`, retrying with backoff like a boot node.
    pub fn dial(&self, addr: Multiaddr) -> Result<(), RelayError> {
        self.send_command(Command::Dial(addr))
    }

    /// Publish `payload` on `topic` and return its id.
    ///
    /// Fails only on local validation or when the node is stopped. Delivery
    /// itself is best effort.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<MessageId, RelayError> {
        let topic = Topic::new(topic)?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::new(
            self.local_peer_id.to_bytes(),
            sequence,
            topic,
            payload,
            unix_millis(),
        )?;
        let id = envelope.id;
        self.send_command(Command::Publish(envelope))?;
        Ok(id)
    }

    /// Fire-and-forget text publish. Failures are logged, never returned.
    pub fn send_message(&self, topic: &str, message: &str) {
        match self.publish(topic, message.as_bytes().to_vec()) {
            Ok(id) => debug!(topic, id = %id.short(), "message queued"),
            Err(e) => warn!(topic, "send_message failed: {}", e),
        }
    }

    /// Current peer set.
    pub fn peers(&self) -> Arc<DirectorySnapshot> {
        self.peers.borrow().clone()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers().peer_ids().into_iter().collect()
    }

    /// A receiver that sees every published peer snapshot.
    pub fn watch_peers(&self) -> watch::Receiver<Arc<DirectorySnapshot>> {
        self.peers.clone()
    }

    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.borrow().clone()
    }

    /// Wait until the swarm reports its first listen address.
    pub async fn wait_for_listen_addr(&self) -> Result<Multiaddr, RelayError> {
        let mut rx = self.listen_addrs.clone();
        let addrs = rx
            .wait_for(|addrs| !addrs.is_empty())
            .await
            .map_err(|_| RelayError::ChannelError {
                reason: "relay task stopped before listening".to_string(),
            })?;
        let first = addrs.first().cloned();
        first.ok_or_else(|| RelayError::ChannelError {
            reason: "no listen address".to_string(),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Relay metrics in Prometheus text exposition format.
    pub fn metrics_text(&self) -> Result<String, RelayError> {
        self.stats.encode()
    }

    /// Stop networking and wait for the swarm task and delivery thread.
    ///
    /// Must not be awaited from inside a listener.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        match self.state.compare_exchange(
            NodeState::Running as u8,
            NodeState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) if current == NodeState::Idle as u8 => {
                self.state
                    .store(NodeState::Stopped as u8, Ordering::Release);
                return Ok(());
            }
            Err(_) => return Err(RelayError::NotRunning),
        }

        let _ = self.commands.send(Command::Shutdown);

        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("relay task ended abnormally: {}", e);
            }
        }

        let delivery = lock(&self.delivery).take();
        if let Some(handle) = delivery {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!("delivery thread panicked"),
                Err(e) => warn!("failed to join delivery thread: {}", e),
            }
        }

        self.state
            .store(NodeState::Stopped as u8, Ordering::Release);
        info!(peer_id = %self.local_peer_id, "node stopped");
        Ok(())
    }

    fn send_command(&self, command: Command) -> Result<(), RelayError> {
        match self.state() {
            NodeState::Stopping | NodeState::Stopped => return Err(RelayError::NotRunning),
            _ => {}
        }
        self.commands
            .send(command)
            .map_err(|_| RelayError::ChannelError {
                reason: "relay task is gone".to_string(),
            })
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.state() == NodeState::Running {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
