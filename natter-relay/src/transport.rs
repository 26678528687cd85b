use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::OutboundRequestId;
use libp2p::{Multiaddr, PeerId, Swarm, SwarmBuilder};
use natter_types::network::WireMessage;

use crate::behaviour::{build_behaviour, NatterBehaviour};
use crate::config::RelayConfig;
use crate::error::RelayError;

/// Derive the node keypair from the configured seed, or generate one.
pub fn load_keypair(seed: Option<[u8; 32]>) -> Result<Keypair, RelayError> {
    match seed {
        Some(mut seed_bytes) => Keypair::ed25519_from_bytes(&mut seed_bytes).map_err(|e| {
            RelayError::NetworkError {
                reason: format!("invalid keypair seed: {}", e),
            }
        }),
        None => Ok(Keypair::generate_ed25519()),
    }
}

/// Build the swarm: TCP + noise + yamux with DNS, and the natter behaviour.
pub fn build_swarm(
    keypair: Keypair,
    config: &RelayConfig,
) -> Result<Swarm<NatterBehaviour>, RelayError> {
    let enable_mdns = config.enable_mdns;
    let enable_kad = config.enable_kad;
    let idle_timeout = config.idle_connection_timeout;

    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            libp2p::tcp::Config::default().nodelay(true),
            libp2p::noise::Config::new,
            libp2p::yamux::Config::default,
        )
        .map_err(|e| RelayError::NetworkError {
            reason: format!("tcp transport: {}", e),
        })?
        .with_dns()
        .map_err(|e| RelayError::NetworkError {
            reason: format!("dns transport: {}", e),
        })?
        .with_behaviour(|key| build_behaviour(key, enable_mdns, enable_kad))
        .map_err(|e| RelayError::NetworkError {
            reason: format!("behaviour: {}", e),
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_timeout))
        .build();

    Ok(swarm)
}

/// `/ip4/<ip>/tcp/<port>` (or `/ip6/...`) for a socket address.
pub fn socket_multiaddr(addr: SocketAddr) -> Multiaddr {
    Multiaddr::from(addr.ip()).with(Protocol::Tcp(addr.port()))
}

/// Whether a frame was accepted into a peer's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// The queue was full; the frame was discarded.
    Dropped,
}

#[derive(Debug, Default)]
struct PeerQueue {
    pending: VecDeque<WireMessage>,
    in_flight: Option<OutboundRequestId>,
    last_sent: Option<Instant>,
}

/// Per-peer stop-and-wait send queues.
///
/// At most one request per peer is outstanding; the next frame leaves only
/// after the previous one was acked or failed, so frames reach each peer in
/// the order they were queued.
pub struct Outbox {
    queues: HashMap<PeerId, PeerQueue>,
    max_pending: usize,
}

impl Outbox {
    pub fn new(max_pending: usize) -> Self {
        Self {
            queues: HashMap::new(),
            max_pending,
        }
    }

    pub fn push(&mut self, peer: PeerId, frame: WireMessage) -> Enqueue {
        let queue = self.queues.entry(peer).or_default();
        if queue.pending.len() >= self.max_pending {
            return Enqueue::Dropped;
        }
        queue.pending.push_back(frame);
        Enqueue::Queued
    }

    /// Take the next frame for `peer` if nothing is in flight.
    pub fn take_next(&mut self, peer: &PeerId) -> Option<WireMessage> {
        let queue = self.queues.get_mut(peer)?;
        if queue.in_flight.is_some() {
            return None;
        }
        queue.pending.pop_front()
    }

    pub fn mark_in_flight(&mut self, peer: PeerId, request: OutboundRequestId, now: Instant) {
        let queue = self.queues.entry(peer).or_default();
        queue.in_flight = Some(request);
        queue.last_sent = Some(now);
    }

    /// Clear the in-flight slot if it holds `request`. Returns false for
    /// requests this outbox no longer tracks.
    pub fn complete(&mut self, peer: &PeerId, request: OutboundRequestId) -> bool {
        match self.queues.get_mut(peer) {
            Some(queue) if queue.in_flight == Some(request) => {
                queue.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Nothing queued and nothing in flight for `peer`.
    pub fn is_idle(&self, peer: &PeerId) -> bool {
        self.queues
            .get(peer)
            .map(|q| q.in_flight.is_none() && q.pending.is_empty())
            .unwrap_or(true)
    }

    /// Idle and nothing sent for at least `interval`.
    pub fn needs_heartbeat(&self, peer: &PeerId, now: Instant, interval: Duration) -> bool {
        if !self.is_idle(peer) {
            return false;
        }
        match self.queues.get(peer).and_then(|q| q.last_sent) {
            Some(sent) => now.saturating_duration_since(sent) >= interval,
            None => true,
        }
    }

    pub fn pending_len(&self, peer: &PeerId) -> usize {
        self.queues.get(peer).map(|q| q.pending.len()).unwrap_or(0)
    }

    /// Drop the queue for `peer`. Returns the number of frames discarded.
    pub fn forget(&mut self, peer: &PeerId) -> usize {
        self.queues
            .remove(peer)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(ts: u64) -> WireMessage {
        WireMessage::Heartbeat { timestamp: ts }
    }

    /// Two distinct request ids, borrowed from a throwaway behaviour.
    fn request_ids() -> (OutboundRequestId, OutboundRequestId) {
        let keypair = Keypair::generate_ed25519();
        let mut behaviour = build_behaviour(&keypair, false, false).unwrap();
        let peer = PeerId::random();
        let a = behaviour.flood.send_request(&peer, heartbeat(0));
        let b = behaviour.flood.send_request(&peer, heartbeat(1));
        (a, b)
    }

    #[test]
    fn test_load_keypair_from_seed_is_deterministic() {
        let a = load_keypair(Some([42u8; 32])).unwrap();
        let b = load_keypair(Some([42u8; 32])).unwrap();
        assert_eq!(a.public().to_peer_id(), b.public().to_peer_id());
        let c = load_keypair(None).unwrap();
        assert_ne!(a.public().to_peer_id(), c.public().to_peer_id());
    }

    #[test]
    fn test_socket_multiaddr() {
        let addr: SocketAddr = "127.0.0.1:4701".parse().unwrap();
        assert_eq!(
            socket_multiaddr(addr).to_string(),
            "/ip4/127.0.0.1/tcp/4701"
        );
    }

    #[tokio::test]
    async fn test_build_swarm() {
        let keypair = Keypair::generate_ed25519();
        let peer_id = keypair.public().to_peer_id();
        let swarm = build_swarm(keypair, &RelayConfig::local()).unwrap();
        assert_eq!(*swarm.local_peer_id(), peer_id);
    }

    #[test]
    fn test_outbox_is_stop_and_wait() {
        let (first, _) = request_ids();
        let mut outbox = Outbox::new(8);
        let peer = PeerId::random();
        let now = Instant::now();

        outbox.push(peer, heartbeat(1));
        outbox.push(peer, heartbeat(2));
        assert_eq!(outbox.take_next(&peer), Some(heartbeat(1)));
        outbox.mark_in_flight(peer, first, now);

        // Second frame waits for the first ack.
        assert_eq!(outbox.take_next(&peer), None);
        assert!(outbox.complete(&peer, first));
        assert_eq!(outbox.take_next(&peer), Some(heartbeat(2)));
    }

    #[test]
    fn test_outbox_ignores_stale_completion() {
        let (first, second) = request_ids();
        let mut outbox = Outbox::new(8);
        let peer = PeerId::random();
        outbox.push(peer, heartbeat(1));
        outbox.take_next(&peer);
        outbox.mark_in_flight(peer, second, Instant::now());
        assert!(!outbox.complete(&peer, first));
        assert!(!outbox.is_idle(&peer));
    }

    #[test]
    fn test_outbox_bound_drops_overflow() {
        let mut outbox = Outbox::new(2);
        let peer = PeerId::random();
        assert_eq!(outbox.push(peer, heartbeat(1)), Enqueue::Queued);
        assert_eq!(outbox.push(peer, heartbeat(2)), Enqueue::Queued);
        assert_eq!(outbox.push(peer, heartbeat(3)), Enqueue::Dropped);
        assert_eq!(outbox.pending_len(&peer), 2);
        assert_eq!(outbox.forget(&peer), 2);
        assert!(outbox.is_idle(&peer));
    }

    #[test]
    fn test_needs_heartbeat_only_when_idle_and_quiet() {
        let (first, _) = request_ids();
        let mut outbox = Outbox::new(8);
        let peer = PeerId::random();
        let now = Instant::now();
        let interval = Duration::from_secs(5);

        assert!(outbox.needs_heartbeat(&peer, now, interval));
        outbox.mark_in_flight(peer, first, now);
        assert!(!outbox.needs_heartbeat(&peer, now + interval, interval));
        outbox.complete(&peer, first);
        assert!(!outbox.needs_heartbeat(&peer, now + Duration::from_secs(1), interval));
        assert!(outbox.needs_heartbeat(&peer, now + interval, interval));
    }
}
