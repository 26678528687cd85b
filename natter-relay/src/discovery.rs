use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use libp2p::swarm::ConnectionId;
use libp2p::{Multiaddr, PeerId};

use crate::config::BackoffConfig;

/// Handles bootstrap peer discovery.
pub struct Discovery {
    boot_nodes: Vec<Multiaddr>,
}

impl Discovery {
    /// Create a new Discovery from a list of multiaddr strings.
    /// Invalid multiaddr strings are logged and skipped.
    pub fn new(boot_nodes: &[String]) -> Self {
        let addrs = boot_nodes
            .iter()
            .filter_map(|s| {
                s.parse::<Multiaddr>()
                    .map_err(|e| {
                        tracing::warn!("Invalid multiaddr '{}': {}", s, e);
                        e
                    })
                    .ok()
            })
            .collect();

        Self { boot_nodes: addrs }
    }

    /// Return the parsed bootstrap addresses.
    pub fn boot_addrs(&self) -> &[Multiaddr] {
        &self.boot_nodes
    }
}

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
pub fn backoff_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| config.base_delay.checked_mul(factor))
        .map(|delay| delay.min(config.max_delay))
        .unwrap_or(config.max_delay)
}

/// Where a dial target stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialState {
    /// Waiting until `next_at`; `failures` dials have failed so far.
    Pending { failures: u32, next_at: Instant },
    /// A dial is outstanding.
    InFlight { failures: u32 },
    Connected,
    /// A boot target that gave up after the configured number of attempts.
    Unreachable,
}

/// Stable handle for a target inside the [`Dialer`]. Ids are never reused.
pub type TargetId = u64;

#[derive(Debug)]
struct DialTarget {
    addr: Multiaddr,
    boot: bool,
    peer: Option<PeerId>,
    state: DialState,
}

/// A failed dial and what happens next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialFailure {
    pub addr: Multiaddr,
    /// Failed attempts so far.
    pub failures: u32,
    /// No further attempts will be made.
    pub unreachable: bool,
    /// When the next attempt is scheduled, if any.
    pub retry_in: Option<Duration>,
}

/// Backoff-driven dial scheduler for boot and discovered addresses.
///
/// The dialer only keeps book; the swarm task performs the actual dials and
/// reports back with the connection id libp2p assigned. Boot targets are kept
/// for the life of the node. Discovered targets are dropped once they give up
/// or their connection goes away, and discovery may add them again.
pub struct Dialer {
    config: BackoffConfig,
    targets: BTreeMap<TargetId, DialTarget>,
    next_id: TargetId,
    in_flight: HashMap<ConnectionId, TargetId>,
}

impl Dialer {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            targets: BTreeMap::new(),
            next_id: 0,
            in_flight: HashMap::new(),
        }
    }

    /// Track `addr`. Known targets are left alone unless they had given up,
    /// in which case they are re-armed with a fresh budget.
    pub fn add_target(&mut self, addr: Multiaddr, boot: bool, now: Instant) -> bool {
        if let Some(target) = self.targets.values_mut().find(|t| t.addr == addr) {
            target.boot |= boot;
            if target.state == DialState::Unreachable {
                target.state = DialState::Pending {
                    failures: 0,
                    next_at: now,
                };
                return true;
            }
            return false;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.targets.insert(
            id,
            DialTarget {
                addr,
                boot,
                peer: None,
                state: DialState::Pending {
                    failures: 0,
                    next_at: now,
                },
            },
        );
        true
    }

    /// Targets whose next attempt is due. The caller must follow up with
    /// [`Dialer::dial_started`] or [`Dialer::dial_failed`] for each.
    pub fn due(&self, now: Instant) -> Vec<(TargetId, Multiaddr)> {
        self.targets
            .iter()
            .filter(|(_, t)| matches!(t.state, DialState::Pending { next_at, .. } if next_at <= now))
            .map(|(id, t)| (*id, t.addr.clone()))
            .collect()
    }

    pub fn dial_started(&mut self, target: TargetId, connection: ConnectionId) {
        if let Some(t) = self.targets.get_mut(&target) {
            if let DialState::Pending { failures, .. } = t.state {
                t.state = DialState::InFlight { failures };
                self.in_flight.insert(connection, target);
            }
        }
    }

    /// Record a dial that failed before libp2p assigned it a connection.
    pub fn dial_failed(&mut self, target: TargetId, now: Instant) -> Option<DialFailure> {
        let t = self.targets.get_mut(&target)?;
        let failures = match t.state {
            DialState::Pending { failures, .. } | DialState::InFlight { failures } => failures,
            _ => return None,
        };
        let failure = Self::schedule_retry(&self.config, t, failures + 1, now);
        if failure.unreachable && !t.boot {
            self.targets.remove(&target);
        }
        Some(failure)
    }

    /// Outcome of a dial this dialer started. Returns `None` for connections
    /// it does not own.
    pub fn connection_failed(
        &mut self,
        connection: ConnectionId,
        now: Instant,
    ) -> Option<DialFailure> {
        let target = self.in_flight.remove(&connection)?;
        self.dial_failed(target, now)
    }

    /// A dial this dialer started succeeded. Returns the dialed address.
    pub fn connection_established(
        &mut self,
        connection: ConnectionId,
        peer: PeerId,
    ) -> Option<Multiaddr> {
        let target = self.in_flight.remove(&connection)?;
        let t = self.targets.get_mut(&target)?;
        t.state = DialState::Connected;
        t.peer = Some(peer);
        Some(t.addr.clone())
    }

    /// The last connection to `peer` went away. Boot targets are re-armed
    /// and their addresses returned; discovered targets are dropped.
    pub fn peer_disconnected(&mut self, peer: &PeerId, now: Instant) -> Vec<Multiaddr> {
        let base = self.config.base_delay;
        let mut rearmed = Vec::new();
        self.targets.retain(|_, t| {
            if t.peer.as_ref() != Some(peer) || t.state != DialState::Connected {
                return true;
            }
            if !t.boot {
                return false;
            }
            t.state = DialState::Pending {
                failures: 0,
                next_at: now + base,
            };
            rearmed.push(t.addr.clone());
            true
        });
        rearmed
    }

    pub fn state_of(&self, addr: &Multiaddr) -> Option<DialState> {
        self.targets
            .values()
            .find(|t| &t.addr == addr)
            .map(|t| t.state)
    }

    /// Addresses that exhausted their attempts.
    pub fn unreachable(&self) -> Vec<Multiaddr> {
        self.targets
            .values()
            .filter(|t| t.state == DialState::Unreachable)
            .map(|t| t.addr.clone())
            .collect()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    fn schedule_retry(
        config: &BackoffConfig,
        target: &mut DialTarget,
        failures: u32,
        now: Instant,
    ) -> DialFailure {
        if failures >= config.max_attempts {
            target.state = DialState::Unreachable;
            return DialFailure {
                addr: target.addr.clone(),
                failures,
                unreachable: true,
                retry_in: None,
            };
        }
        let delay = backoff_delay(config, failures - 1);
        target.state = DialState::Pending {
            failures,
            next_at: now + delay,
        };
        DialFailure {
            addr: target.addr.clone(),
            failures,
            unreachable: false,
            retry_in: Some(delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_attempts,
        }
    }

    fn addr(port: u16) -> Multiaddr {
        format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap()
    }

    #[test]
    fn test_parse_valid_multiaddr() {
        let addrs = vec!["/ip4/127.0.0.1/tcp/4701".to_string()];
        let disc = Discovery::new(&addrs);
        assert_eq!(disc.boot_addrs().len(), 1);
    }

    #[test]
    fn test_parse_invalid_multiaddr() {
        let addrs = vec!["not-a-multiaddr".to_string()];
        let disc = Discovery::new(&addrs);
        assert_eq!(disc.boot_addrs().len(), 0);
    }

    #[test]
    fn test_empty() {
        let disc = Discovery::new(&[]);
        assert!(disc.boot_addrs().is_empty());
    }

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        let config = backoff(10);
        let delays: Vec<u64> = (0..6)
            .map(|n| backoff_delay(&config, n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(backoff_delay(&config, 200), config.max_delay);
    }

    #[test]
    fn test_new_target_is_due_immediately() {
        let mut dialer = Dialer::new(backoff(3));
        let now = Instant::now();
        assert!(dialer.add_target(addr(1), true, now));
        assert!(!dialer.add_target(addr(1), true, now));
        assert_eq!(dialer.due(now), vec![(0, addr(1))]);
    }

    #[test]
    fn test_failures_back_off_then_mark_unreachable() {
        let mut dialer = Dialer::new(backoff(3));
        let now = Instant::now();
        dialer.add_target(addr(1), true, now);

        let first = dialer.dial_failed(0, now).unwrap();
        assert_eq!(first.retry_in, Some(Duration::from_millis(100)));
        assert!(dialer.due(now).is_empty());
        assert_eq!(dialer.due(now + Duration::from_millis(100)).len(), 1);

        let second = dialer.dial_failed(0, now).unwrap();
        assert_eq!(second.retry_in, Some(Duration::from_millis(200)));

        let third = dialer.dial_failed(0, now).unwrap();
        assert!(third.unreachable);
        assert_eq!(third.failures, 3);
        assert_eq!(dialer.unreachable(), vec![addr(1)]);
        assert!(dialer.due(now + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_connection_lifecycle_rearms_boot_target() {
        let mut dialer = Dialer::new(backoff(3));
        let now = Instant::now();
        let peer = PeerId::random();
        let conn = ConnectionId::new_unchecked(7);
        dialer.add_target(addr(1), true, now);
        dialer.dial_started(0, conn);
        assert!(matches!(
            dialer.state_of(&addr(1)),
            Some(DialState::InFlight { failures: 0 })
        ));

        assert_eq!(dialer.connection_established(conn, peer), Some(addr(1)));
        assert_eq!(dialer.state_of(&addr(1)), Some(DialState::Connected));

        let rearmed = dialer.peer_disconnected(&peer, now);
        assert_eq!(rearmed, vec![addr(1)]);
        assert!(dialer.due(now).is_empty());
        assert_eq!(dialer.due(now + Duration::from_millis(100)).len(), 1);
    }

    #[test]
    fn test_discovered_target_is_pruned_on_disconnect_and_can_be_readded() {
        let mut dialer = Dialer::new(backoff(3));
        let now = Instant::now();
        let peer = PeerId::random();
        let conn = ConnectionId::new_unchecked(1);
        dialer.add_target(addr(2), false, now);
        dialer.dial_started(0, conn);
        dialer.connection_established(conn, peer);

        assert!(dialer.peer_disconnected(&peer, now).is_empty());
        assert_eq!(dialer.state_of(&addr(2)), None);
        assert_eq!(dialer.target_count(), 0);

        assert!(dialer.add_target(addr(2), false, now));
        assert_eq!(dialer.due(now), vec![(1, addr(2))]);
    }

    #[test]
    fn test_unreachable_discovered_target_is_pruned() {
        let mut dialer = Dialer::new(backoff(2));
        let now = Instant::now();
        dialer.add_target(addr(1), true, now);
        dialer.add_target(addr(2), false, now);

        assert!(!dialer.dial_failed(1, now).unwrap().unreachable);
        let failure = dialer.dial_failed(1, now).unwrap();
        assert!(failure.unreachable);
        assert_eq!(failure.addr, addr(2));

        assert_eq!(dialer.target_count(), 1);
        assert!(dialer.unreachable().is_empty());
        assert!(dialer.dial_failed(1, now).is_none());
        // The surviving boot target keeps its id.
        assert_eq!(dialer.due(now), vec![(0, addr(1))]);
    }

    #[test]
    fn test_foreign_connection_ids_are_ignored() {
        let mut dialer = Dialer::new(backoff(3));
        let now = Instant::now();
        assert!(dialer
            .connection_failed(ConnectionId::new_unchecked(99), now)
            .is_none());
        assert!(dialer
            .connection_established(ConnectionId::new_unchecked(99), PeerId::random())
            .is_none());
    }

    #[test]
    fn test_unreachable_target_can_be_rearmed() {
        let mut dialer = Dialer::new(backoff(1));
        let now = Instant::now();
        dialer.add_target(addr(3), true, now);
        assert!(dialer.dial_failed(0, now).unwrap().unreachable);
        assert!(dialer.add_target(addr(3), true, now));
        assert_eq!(dialer.due(now).len(), 1);
    }
}
