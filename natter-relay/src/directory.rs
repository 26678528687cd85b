use libp2p::PeerId;
use natter_types::network::Hello;
use natter_types::primitives::Topic;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::error::RelayError;

/// Information about a connected peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// The libp2p peer ID.
    pub peer_id: PeerId,
    /// Topics the peer has advertised interest in.
    pub topics: BTreeSet<Topic>,
    /// The peer's wire protocol version (set via `Hello`).
    pub protocol_version: Option<u8>,
    /// Agent string from `Hello` or identify.
    pub agent: Option<String>,
    /// Number of open connections to this peer.
    pub connections: u32,
    /// When this peer connected.
    pub connected_at: Instant,
    /// Last time any frame or ack arrived from this peer.
    pub last_seen: Instant,
}

/// Result of [`PeerDirectory::add_peer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New entry created.
    Added,
    /// Another connection to a peer already in the directory.
    AlreadyKnown,
    /// The connection limit is reached; the peer was not added.
    Full,
}

/// Read-only view of the directory handed to readers outside the swarm task.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    peers: HashMap<PeerId, PeerSummary>,
}

/// Per-peer part of a [`DirectorySnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub peer_id: PeerId,
    pub topics: BTreeSet<Topic>,
    pub agent: Option<String>,
    pub protocol_version: Option<u8>,
}

impl DirectorySnapshot {
    pub fn peer_ids(&self) -> HashSet<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerSummary> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Peers that advertised interest in `topic`.
    pub fn interested_in(&self, topic: &Topic) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| p.topics.contains(topic))
            .map(|p| p.peer_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerSummary> {
        self.peers.values()
    }
}

/// Authoritative registry of connected peers and their health.
///
/// Owned and mutated only by the swarm task. Other threads read the
/// snapshots it produces.
pub struct PeerDirectory {
    peers: HashMap<PeerId, PeerInfo>,
    max_connections: usize,
    dirty: bool,
}

impl PeerDirectory {
    /// Create a new PeerDirectory with a maximum connection limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            peers: HashMap::new(),
            max_connections,
            dirty: false,
        }
    }

    /// Record an established connection.
    pub fn add_peer(&mut self, peer_id: PeerId, now: Instant) -> AddOutcome {
        if let Some(info) = self.peers.get_mut(&peer_id) {
            info.connections += 1;
            info.last_seen = now;
            return AddOutcome::AlreadyKnown;
        }
        if self.peers.len() >= self.max_connections {
            return AddOutcome::Full;
        }
        self.peers.insert(
            peer_id,
            PeerInfo {
                peer_id,
                topics: BTreeSet::new(),
                protocol_version: None,
                agent: None,
                connections: 1,
                connected_at: now,
                last_seen: now,
            },
        );
        self.dirty = true;
        AddOutcome::Added
    }

    /// Record a closed connection. Removes the peer when its last connection
    /// goes away and returns the number still open.
    pub fn connection_closed(&mut self, peer_id: &PeerId) -> Result<u32, RelayError> {
        let info = self.peers.get_mut(peer_id).ok_or_else(|| unknown(peer_id))?;
        info.connections = info.connections.saturating_sub(1);
        let remaining = info.connections;
        if remaining == 0 {
            self.remove_peer(peer_id)?;
        }
        Ok(remaining)
    }

    /// Remove a peer regardless of how many connections it has.
    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Result<PeerInfo, RelayError> {
        let info = self.peers.remove(peer_id).ok_or_else(|| unknown(peer_id))?;
        self.dirty = true;
        Ok(info)
    }

    /// Note traffic from a peer. Returns false for unknown peers.
    pub fn touch(&mut self, peer_id: &PeerId, now: Instant) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(info) => {
                info.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Apply a peer's handshake: version, agent and the full topic set.
    pub fn apply_hello(&mut self, peer_id: &PeerId, hello: Hello) -> Result<(), RelayError> {
        let info = self.peers.get_mut(peer_id).ok_or_else(|| unknown(peer_id))?;
        info.protocol_version = Some(hello.protocol_version);
        info.agent = Some(hello.agent);
        info.topics = hello.topics.into_iter().collect();
        self.dirty = true;
        Ok(())
    }

    /// Apply a single advertisement. Returns whether the interest set changed.
    pub fn set_topic_interest(
        &mut self,
        peer_id: &PeerId,
        topic: Topic,
        subscribed: bool,
    ) -> Result<bool, RelayError> {
        let info = self.peers.get_mut(peer_id).ok_or_else(|| unknown(peer_id))?;
        let changed = if subscribed {
            info.topics.insert(topic)
        } else {
            info.topics.remove(&topic)
        };
        self.dirty |= changed;
        Ok(changed)
    }

    /// Record the agent string reported by identify, if Hello has not set one.
    pub fn set_agent(&mut self, peer_id: &PeerId, agent: String) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            if info.agent.is_none() {
                info.agent = Some(agent);
                self.dirty = true;
            }
        }
    }

    /// Peers whose last traffic is older than `timeout`.
    pub fn stale_peers(&self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|info| now.saturating_duration_since(info.last_seen) > timeout)
            .map(|info| info.peer_id)
            .collect()
    }

    /// Connected peers that advertised interest in `topic`.
    pub fn interested_peers<'a>(&'a self, topic: &'a Topic) -> impl Iterator<Item = &'a PeerId> {
        self.peers
            .values()
            .filter(move |info| info.topics.contains(topic))
            .map(|info| &info.peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerInfo> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Whether the directory has reached its connection limit.
    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.max_connections
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Iterator over the peer IDs of all connected peers.
    pub fn connected_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot {
            peers: self
                .peers
                .values()
                .map(|info| {
                    (
                        info.peer_id,
                        PeerSummary {
                            peer_id: info.peer_id,
                            topics: info.topics.clone(),
                            agent: info.agent.clone(),
                            protocol_version: info.protocol_version,
                        },
                    )
                })
                .collect(),
        }
    }

    /// A fresh snapshot if anything visible changed since the last call.
    pub fn take_snapshot_if_dirty(&mut self) -> Option<DirectorySnapshot> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.snapshot())
    }
}

fn unknown(peer_id: &PeerId) -> RelayError {
    RelayError::DirectoryError {
        reason: format!("unknown peer {}", peer_id),
    }
}
