use std::collections::{BTreeSet, HashMap};

use libp2p::PeerId;
use natter_types::primitives::{MessageId, Topic};

use crate::directory::PeerDirectory;
use crate::seen::SeenCache;

/// Where a message should go next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    /// Deliver to local listeners.
    pub local: bool,
    /// Peers to forward to.
    pub peers: Vec<PeerId>,
}

/// Maps topics to their local and remote audience.
///
/// Remote interest lives in the [`PeerDirectory`]; the router keeps the
/// local subscription set and, per peer, which message ids have already
/// crossed that link in either direction.
pub struct TopicRouter {
    subscriptions: BTreeSet<Topic>,
    peer_seen: HashMap<PeerId, SeenCache<MessageId>>,
    peer_seen_capacity: usize,
}

impl TopicRouter {
    pub fn new(peer_seen_capacity: usize) -> Self {
        Self {
            subscriptions: BTreeSet::new(),
            peer_seen: HashMap::new(),
            peer_seen_capacity,
        }
    }

    /// Subscribe locally. Returns true if the topic was not already subscribed.
    pub fn subscribe(&mut self, topic: Topic) -> bool {
        self.subscriptions.insert(topic)
    }

    /// Unsubscribe locally. Returns true if the topic was subscribed.
    pub fn unsubscribe(&mut self, topic: &Topic) -> bool {
        self.subscriptions.remove(topic)
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.subscriptions.contains(topic)
    }

    /// Current local subscriptions, in sorted order.
    pub fn topics(&self) -> Vec<Topic> {
        self.subscriptions.iter().cloned().collect()
    }

    /// Compute delivery targets for message `id` on `topic`.
    ///
    /// Peers in `exclude` and peers already known to have `id` are skipped.
    pub fn route(
        &self,
        topic: &Topic,
        id: &MessageId,
        directory: &PeerDirectory,
        exclude: &[PeerId],
    ) -> Route {
        let mut peers: Vec<PeerId> = directory
            .interested_peers(topic)
            .filter(|peer| !exclude.contains(peer))
            .filter(|peer| !self.peer_has(peer, id))
            .copied()
            .collect();
        peers.sort();
        Route {
            local: self.is_subscribed(topic),
            peers,
        }
    }

    /// Record that `id` was sent to `peer`.
    pub fn mark_sent(&mut self, peer: PeerId, id: MessageId) {
        self.cache_for(peer).insert(id);
    }

    /// Record that `peer` sent us `id`.
    pub fn note_received_from(&mut self, peer: PeerId, id: MessageId) {
        self.cache_for(peer).insert(id);
    }

    /// Drop everything known about `peer`.
    pub fn forget_peer(&mut self, peer: &PeerId) {
        self.peer_seen.remove(peer);
    }

    fn peer_has(&self, peer: &PeerId, id: &MessageId) -> bool {
        self.peer_seen
            .get(peer)
            .map(|seen| seen.contains(id))
            .unwrap_or(false)
    }

    fn cache_for(&mut self, peer: PeerId) -> &mut SeenCache<MessageId> {
        let capacity = self.peer_seen_capacity;
        self.peer_seen
            .entry(peer)
            .or_insert_with(|| SeenCache::new(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn topic(name: &str) -> Topic {
        Topic::new(name).unwrap()
    }

    fn id(n: u8) -> MessageId {
        MessageId([n; 32])
    }

    fn directory_with(peers: &[(PeerId, &[&str])]) -> PeerDirectory {
        let mut dir = PeerDirectory::new(16);
        for (peer, topics) in peers {
            dir.add_peer(*peer, Instant::now());
            for t in *topics {
                dir.set_topic_interest(peer, topic(t), true).unwrap();
            }
        }
        dir
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut router = TopicRouter::new(8);
        assert!(router.subscribe(topic("chat")));
        assert!(!router.subscribe(topic("chat")));
        assert_eq!(router.topics(), vec![topic("chat")]);
        assert!(router.unsubscribe(&topic("chat")));
        assert!(!router.unsubscribe(&topic("chat")));
        assert!(router.topics().is_empty());
    }

    #[test]
    fn test_route_local_and_interested_peers() {
        let a = PeerId::random();
        let b = PeerId::random();
        let dir = directory_with(&[(a, &["chat"]), (b, &["news"])]);
        let mut router = TopicRouter::new(8);
        router.subscribe(topic("chat"));

        let route = router.route(&topic("chat"), &id(1), &dir, &[]);
        assert!(route.local);
        assert_eq!(route.peers, vec![a]);

        let route = router.route(&topic("news"), &id(1), &dir, &[]);
        assert!(!route.local);
        assert_eq!(route.peers, vec![b]);
    }

    #[test]
    fn test_route_excludes_sender() {
        let a = PeerId::random();
        let b = PeerId::random();
        let dir = directory_with(&[(a, &["chat"]), (b, &["chat"])]);
        let router = TopicRouter::new(8);
        let route = router.route(&topic("chat"), &id(1), &dir, &[a]);
        assert_eq!(route.peers, vec![b]);
    }

    #[test]
    fn test_route_skips_peers_that_have_the_id() {
        let a = PeerId::random();
        let b = PeerId::random();
        let dir = directory_with(&[(a, &["chat"]), (b, &["chat"])]);
        let mut router = TopicRouter::new(8);
        router.mark_sent(a, id(1));
        router.note_received_from(b, id(2));

        assert_eq!(router.route(&topic("chat"), &id(1), &dir, &[]).peers, vec![b]);
        assert_eq!(router.route(&topic("chat"), &id(2), &dir, &[]).peers, vec![a]);
    }

    #[test]
    fn test_forget_peer_clears_cache() {
        let a = PeerId::random();
        let dir = directory_with(&[(a, &["chat"])]);
        let mut router = TopicRouter::new(8);
        router.mark_sent(a, id(1));
        router.forget_peer(&a);
        assert_eq!(router.route(&topic("chat"), &id(1), &dir, &[]).peers, vec![a]);
    }

    #[test]
    fn test_route_after_eviction_is_empty() {
        let a = PeerId::random();
        let mut dir = directory_with(&[(a, &["rare"])]);
        let mut router = TopicRouter::new(8);
        dir.remove_peer(&a).unwrap();
        router.forget_peer(&a);
        let route = router.route(&topic("rare"), &id(9), &dir, &[]);
        assert!(route.peers.is_empty());
        assert!(!route.local);
    }
}
