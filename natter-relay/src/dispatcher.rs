use libp2p::PeerId;
use natter_types::network::Envelope;
use natter_types::primitives::MessageId;

use crate::directory::PeerDirectory;
use crate::error::RelayError;
use crate::listener::Event;
use crate::router::TopicRouter;
use crate::seen::SeenCache;

/// What to do with an inbound publish.
#[derive(Debug)]
pub enum InboundOutcome {
    /// The id was dispatched before.
    Duplicate,
    /// The message was published by this node.
    Looped,
    /// The envelope could not be trusted and was dropped.
    Malformed(RelayError),
    Accepted {
        /// Present when the topic is subscribed locally.
        event: Option<Event>,
        /// Peers to relay the envelope to.
        forward: Vec<PeerId>,
    },
}

/// Dedup and fan-out decisions for published messages.
pub struct Dispatcher {
    seen: SeenCache<MessageId>,
    local_peer: PeerId,
}

impl Dispatcher {
    pub fn new(local_peer: PeerId, seen_capacity: usize) -> Self {
        Self {
            seen: SeenCache::new(seen_capacity),
            local_peer,
        }
    }

    /// Handle a message published by this node and return the peers to send it to.
    ///
    /// The id is recorded so the message is never delivered back to us.
    pub fn on_local(
        &mut self,
        envelope: &Envelope,
        router: &TopicRouter,
        directory: &PeerDirectory,
    ) -> Vec<PeerId> {
        self.seen.insert(envelope.id);
        router
            .route(&envelope.topic, &envelope.id, directory, &[])
            .peers
    }

    /// Handle a publish frame received from `from`.
    pub fn on_inbound(
        &mut self,
        from: PeerId,
        envelope: &Envelope,
        router: &mut TopicRouter,
        directory: &PeerDirectory,
    ) -> InboundOutcome {
        // `from` is credited with an id only when the envelope checks out.
        if self.seen.contains(&envelope.id) {
            if envelope.id_matches() {
                router.note_received_from(from, envelope.id);
            }
            return InboundOutcome::Duplicate;
        }

        let origin = match PeerId::from_bytes(&envelope.origin) {
            Ok(origin) => origin,
            Err(e) => {
                return InboundOutcome::Malformed(RelayError::ProtocolError {
                    reason: format!("invalid origin peer id: {}", e),
                })
            }
        };
        if !envelope.id_matches() {
            return InboundOutcome::Malformed(RelayError::ProtocolError {
                reason: format!("message id {} does not match contents", envelope.id.short()),
            });
        }

        router.note_received_from(from, envelope.id);
        self.seen.insert(envelope.id);
        if origin == self.local_peer {
            return InboundOutcome::Looped;
        }

        let route = router.route(&envelope.topic, &envelope.id, directory, &[from, origin]);
        let event = route
            .local
            .then(|| Event::from_envelope(envelope, origin, from));
        InboundOutcome::Accepted {
            event,
            forward: route.peers,
        }
    }

    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natter_types::primitives::Topic;
    use std::time::Instant;

    fn topic(name: &str) -> Topic {
        Topic::new(name).unwrap()
    }

    fn envelope_from(origin: &PeerId, seq: u64, payload: &[u8]) -> Envelope {
        Envelope::new(origin.to_bytes(), seq, topic("chat"), payload.to_vec(), 0).unwrap()
    }

    struct Fixture {
        local: PeerId,
        dispatcher: Dispatcher,
        router: TopicRouter,
        directory: PeerDirectory,
    }

    fn fixture() -> Fixture {
        let local = PeerId::random();
        let mut router = TopicRouter::new(64);
        router.subscribe(topic("chat"));
        Fixture {
            local,
            dispatcher: Dispatcher::new(local, 64),
            router,
            directory: PeerDirectory::new(16),
        }
    }

    fn connect(dir: &mut PeerDirectory, interested: bool) -> PeerId {
        let peer = PeerId::random();
        dir.add_peer(peer, Instant::now());
        if interested {
            dir.set_topic_interest(&peer, topic("chat"), true).unwrap();
        }
        peer
    }

    #[test]
    fn test_inbound_accepted_once() {
        let mut f = fixture();
        let sender = connect(&mut f.directory, true);
        let env = envelope_from(&sender, 1, b"hi");

        match f
            .dispatcher
            .on_inbound(sender, &env, &mut f.router, &f.directory)
        {
            InboundOutcome::Accepted { event, forward } => {
                let event = event.expect("subscribed locally");
                assert_eq!(event.message, "hi");
                assert_eq!(event.origin, sender);
                assert_eq!(event.source, sender);
                assert!(forward.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert!(matches!(
            f.dispatcher
                .on_inbound(sender, &env, &mut f.router, &f.directory),
            InboundOutcome::Duplicate
        ));
    }

    #[test]
    fn test_dedup_is_keyed_on_id_only() {
        let mut f = fixture();
        let sender = connect(&mut f.directory, true);
        let env = envelope_from(&sender, 1, b"first");
        f.dispatcher
            .on_inbound(sender, &env, &mut f.router, &f.directory);

        let mut forged = env.clone();
        forged.payload = b"different".to_vec();
        assert!(matches!(
            f.dispatcher
                .on_inbound(sender, &forged, &mut f.router, &f.directory),
            InboundOutcome::Duplicate
        ));
    }

    #[test]
    fn test_own_message_is_looped() {
        let mut f = fixture();
        let relay = connect(&mut f.directory, true);
        let env = envelope_from(&f.local, 1, b"mine");
        assert!(matches!(
            f.dispatcher
                .on_inbound(relay, &env, &mut f.router, &f.directory),
            InboundOutcome::Looped
        ));
    }

    #[test]
    fn test_local_publish_never_echoes() {
        let mut f = fixture();
        let peer = connect(&mut f.directory, true);
        let env = envelope_from(&f.local, 1, b"mine");

        let targets = f.dispatcher.on_local(&env, &f.router, &f.directory);
        assert_eq!(targets, vec![peer]);

        // A peer relaying it back is recognized as already seen.
        assert!(matches!(
            f.dispatcher
                .on_inbound(peer, &env, &mut f.router, &f.directory),
            InboundOutcome::Duplicate
        ));
    }

    #[test]
    fn test_forward_excludes_sender_and_origin() {
        let mut f = fixture();
        let origin = connect(&mut f.directory, true);
        let sender = connect(&mut f.directory, true);
        let other = connect(&mut f.directory, true);
        let _uninterested = connect(&mut f.directory, false);
        let env = envelope_from(&origin, 5, b"relay me");

        match f
            .dispatcher
            .on_inbound(sender, &env, &mut f.router, &f.directory)
        {
            InboundOutcome::Accepted { forward, .. } => assert_eq!(forward, vec![other]),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_unsubscribed_topic_is_forwarded_without_event() {
        let mut f = fixture();
        f.router.unsubscribe(&topic("chat"));
        let sender = connect(&mut f.directory, true);
        let other = connect(&mut f.directory, true);
        let env = envelope_from(&sender, 1, b"pass through");

        match f
            .dispatcher
            .on_inbound(sender, &env, &mut f.router, &f.directory)
        {
            InboundOutcome::Accepted { event, forward } => {
                assert!(event.is_none());
                assert_eq!(forward, vec![other]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_bad_origin_is_malformed() {
        let mut f = fixture();
        let sender = connect(&mut f.directory, true);
        let env = Envelope::new(vec![0xde, 0xad], 1, topic("chat"), b"x".to_vec(), 0).unwrap();
        assert!(matches!(
            f.dispatcher
                .on_inbound(sender, &env, &mut f.router, &f.directory),
            InboundOutcome::Malformed(RelayError::ProtocolError { .. })
        ));
        assert!(!f.dispatcher.has_seen(&env.id));
    }

    #[test]
    fn test_tampered_envelope_is_malformed() {
        let mut f = fixture();
        let sender = connect(&mut f.directory, true);
        let mut env = envelope_from(&sender, 1, b"hi");
        env.payload = b"tampered".to_vec();
        assert!(matches!(
            f.dispatcher
                .on_inbound(sender, &env, &mut f.router, &f.directory),
            InboundOutcome::Malformed(_)
        ));
    }

    #[test]
    fn test_forged_copy_does_not_suppress_forward_to_its_sender() {
        let mut f = fixture();
        let origin = connect(&mut f.directory, true);
        let sender = connect(&mut f.directory, true);
        let forger = connect(&mut f.directory, true);
        let env = envelope_from(&origin, 3, b"real");

        let mut forged = env.clone();
        forged.payload = b"fake".to_vec();
        assert!(matches!(
            f.dispatcher
                .on_inbound(forger, &forged, &mut f.router, &f.directory),
            InboundOutcome::Malformed(_)
        ));

        match f
            .dispatcher
            .on_inbound(sender, &env, &mut f.router, &f.directory)
        {
            InboundOutcome::Accepted { forward, .. } => assert_eq!(forward, vec![forger]),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_empty_payload_is_delivered() {
        let mut f = fixture();
        let sender = connect(&mut f.directory, true);
        let env = envelope_from(&sender, 1, b"");
        match f
            .dispatcher
            .on_inbound(sender, &env, &mut f.router, &f.directory)
        {
            InboundOutcome::Accepted { event: Some(e), .. } => assert!(e.message.is_empty()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
