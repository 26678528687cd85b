use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use libp2p::request_response::{self, OutboundRequestId};
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::SwarmEvent;
use libp2p::{identify, kad, mdns, Multiaddr, PeerId, Swarm};
use natter_types::constants::MAINTENANCE_TICK;
use natter_types::network::{Ack, Envelope, Hello, WireMessage};
use natter_types::primitives::{Timestamp, Topic};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::behaviour::{NatterBehaviour, NatterBehaviourEvent};
use crate::config::RelayConfig;
use crate::directory::{AddOutcome, DirectorySnapshot, PeerDirectory};
use crate::discovery::{DialFailure, Dialer, Discovery};
use crate::dispatcher::{Dispatcher, InboundOutcome};
use crate::error::RelayError;
use crate::listener::Event;
use crate::protocol::{agent_version, KAD_PROTOCOL, PROTOCOL_VERSION};
use crate::router::TopicRouter;
use crate::stats::RelayStats;
use crate::transport::{Enqueue, Outbox};

/// Requests from the façade to the swarm task.
#[derive(Debug)]
pub enum Command {
    Publish(Envelope),
    Subscribe(Topic),
    Unsubscribe(Topic),
    /// Dial an address with boot-node retry semantics.
    Dial(Multiaddr),
    Shutdown,
}

/// Channel ends the swarm task owns.
pub struct RelayChannels {
    pub commands: mpsc::UnboundedReceiver<Command>,
    /// Ordered queue drained by the delivery thread.
    pub delivery: mpsc::Sender<Event>,
    pub events: broadcast::Sender<Event>,
    pub peers: watch::Sender<Arc<DirectorySnapshot>>,
    pub listen_addrs: watch::Sender<Vec<Multiaddr>>,
    pub stats: Arc<RelayStats>,
}

/// The swarm task: sole owner of the swarm and all networking state.
pub struct RelayNode {
    config: RelayConfig,
    swarm: Swarm<NatterBehaviour>,
    directory: PeerDirectory,
    router: TopicRouter,
    dispatcher: Dispatcher,
    outbox: Outbox,
    dialer: Dialer,
    /// When the next Kademlia bootstrap query is due.
    next_discovery: Instant,
    channels: RelayChannels,
}

impl RelayNode {
    /// Wrap a listening swarm. Boot nodes are armed on the dialer and dialed
    /// on the first maintenance tick.
    pub fn new(config: RelayConfig, swarm: Swarm<NatterBehaviour>, channels: RelayChannels) -> Self {
        let local_peer = *swarm.local_peer_id();
        let now = Instant::now();

        let mut dialer = Dialer::new(config.dial_backoff);
        let discovery = Discovery::new(&config.boot_nodes);
        for addr in discovery.boot_addrs() {
            dialer.add_target(addr.clone(), true, now);
        }

        Self {
            directory: PeerDirectory::new(config.max_connections),
            router: TopicRouter::new(config.peer_seen_cache_size),
            dispatcher: Dispatcher::new(local_peer, config.seen_cache_size),
            outbox: Outbox::new(config.max_pending_frames),
            dialer,
            next_discovery: now + config.discovery_interval,
            swarm,
            channels,
            config,
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    /// Main event loop. Runs until a `Shutdown` command arrives or every
    /// command sender is gone.
    pub async fn run(mut self) {
        info!(
            peer_id = %self.local_peer_id(),
            boot_nodes = self.dialer.target_count(),
            "relay task started"
        );

        let mut tick = tokio::time::interval(MAINTENANCE_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
                command = self.channels.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = tick.tick() => {
                    self.maintain(Instant::now());
                }
            }
            self.publish_snapshot();
        }

        let peers: Vec<PeerId> = self.directory.connected_peers().copied().collect();
        for peer in peers {
            let _ = self.swarm.disconnect_peer_id(peer);
        }
        info!(peer_id = %self.local_peer_id(), "relay task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Publish(envelope) => {
                self.channels.stats.record_published();
                let targets = self
                    .dispatcher
                    .on_local(&envelope, &self.router, &self.directory);
                debug!(
                    topic = %envelope.topic,
                    id = %envelope.id.short(),
                    peers = targets.len(),
                    "publishing message"
                );
                for peer in targets {
                    self.send_publish(peer, envelope.clone());
                }
            }
            Command::Subscribe(topic) => {
                if self.router.subscribe(topic.clone()) {
                    info!(topic = %topic, "subscribed");
                    self.advertise(topic, true);
                }
            }
            Command::Unsubscribe(topic) => {
                if self.router.unsubscribe(&topic) {
                    info!(topic = %topic, "unsubscribed");
                    self.advertise(topic, false);
                }
            }
            Command::Dial(addr) => {
                if self.dialer.add_target(addr.clone(), true, Instant::now()) {
                    debug!(%addr, "dial target added");
                }
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<NatterBehaviourEvent>) {
        let now = Instant::now();
        match event {
            SwarmEvent::Behaviour(NatterBehaviourEvent::Flood(event)) => {
                self.handle_flood_event(event, now);
            }
            SwarmEvent::Behaviour(NatterBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!(
                    %peer_id,
                    protocol = %info.protocol_version,
                    agent = %info.agent_version,
                    "identified peer"
                );
                if info.protocols.iter().any(|p| p.as_ref() == KAD_PROTOCOL) {
                    if let Some(kad) = self.swarm.behaviour_mut().kad.as_mut() {
                        for addr in info.listen_addrs {
                            kad.add_address(&peer_id, addr);
                        }
                    }
                }
                self.directory.set_agent(&peer_id, info.agent_version);
            }
            SwarmEvent::Behaviour(NatterBehaviourEvent::Kad(event)) => {
                self.handle_kad_event(event, now);
            }
            SwarmEvent::Behaviour(NatterBehaviourEvent::Mdns(mdns::Event::Discovered(found))) => {
                for (peer_id, addr) in found {
                    if peer_id == self.local_peer_id() || self.directory.contains(&peer_id) {
                        continue;
                    }
                    if self.dialer.add_target(addr.clone(), false, now) {
                        debug!(%peer_id, %addr, "discovered peer via mdns");
                    }
                }
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                if let Some(addr) = self.dialer.connection_established(connection_id, peer_id) {
                    info!(%peer_id, %addr, "connected to dial target");
                    if let Some(kad) = self.swarm.behaviour_mut().kad.as_mut() {
                        kad.add_address(&peer_id, addr);
                        self.next_discovery = now;
                    }
                }
                match self.directory.add_peer(peer_id, now) {
                    AddOutcome::Added => {
                        info!(%peer_id, ?endpoint, "peer connected");
                        let hello = self.hello();
                        self.send_frame(peer_id, WireMessage::Hello(hello));
                    }
                    AddOutcome::AlreadyKnown => {
                        debug!(%peer_id, "additional connection to known peer");
                    }
                    AddOutcome::Full => {
                        warn!(
                            %peer_id,
                            max = self.config.max_connections,
                            "peer limit reached, disconnecting peer"
                        );
                        let _ = self.swarm.disconnect_peer_id(peer_id);
                    }
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                debug!(%peer_id, ?cause, "connection closed");
                match self.directory.connection_closed(&peer_id) {
                    Ok(0) => {
                        info!(%peer_id, "peer disconnected");
                        self.forget_peer(&peer_id);
                    }
                    Ok(_) => {}
                    Err(e) => debug!(%peer_id, "{}", e),
                }
                if num_established == 0 {
                    for addr in self.dialer.peer_disconnected(&peer_id, now) {
                        debug!(%peer_id, %addr, "boot peer lost, will redial");
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError {
                connection_id,
                peer_id,
                error,
                ..
            } => match self.dialer.connection_failed(connection_id, now) {
                Some(failure) => {
                    let err = RelayError::ConnectionError {
                        reason: format!("dial {}: {}", failure.addr, error),
                    };
                    self.report_dial_failure(failure, err);
                }
                None => debug!(?peer_id, "outgoing connection failed: {}", error),
            },
            SwarmEvent::IncomingConnectionError {
                send_back_addr,
                error,
                ..
            } => {
                debug!(%send_back_addr, "incoming connection failed: {}", error);
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "listening on new address");
                self.channels
                    .listen_addrs
                    .send_modify(|addrs| addrs.push(address));
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                info!(%address, "listen address expired");
                self.channels
                    .listen_addrs
                    .send_modify(|addrs| addrs.retain(|a| a != &address));
            }
            SwarmEvent::ListenerError { error, .. } => {
                warn!("listener error: {}", error);
            }
            other => {
                trace!(?other, "other swarm event");
            }
        }
    }

    fn handle_flood_event(
        &mut self,
        event: request_response::Event<WireMessage, Ack>,
        now: Instant,
    ) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    self.directory.touch(&peer, now);
                    trace!(%peer, kind = request.kind(), "received frame");
                    let ack = self.handle_frame(peer, request);
                    if self
                        .swarm
                        .behaviour_mut()
                        .flood
                        .send_response(channel, ack)
                        .is_err()
                    {
                        debug!(%peer, "ack not sent, stream already closed");
                    }
                }
                request_response::Message::Response {
                    request_id,
                    response,
                    ..
                } => {
                    self.directory.touch(&peer, now);
                    if let Ack::Rejected { reason } = &response {
                        debug!(%peer, %reason, "frame rejected by peer");
                    }
                    self.frame_done(peer, request_id);
                }
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                self.channels.stats.record_dropped_frame();
                warn!(%peer, "outbound frame failed: {}", error);
                self.frame_done(peer, request_id);
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                self.channels.stats.record_malformed();
                warn!(%peer, "inbound frame failed: {}", error);
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    /// Apply one inbound frame and decide the ack.
    fn handle_frame(&mut self, peer: PeerId, frame: WireMessage) -> Ack {
        if !self.directory.contains(&peer) {
            return rejected(RelayError::DirectoryError {
                reason: format!("frame from unregistered peer {}", peer),
            });
        }
        match frame {
            WireMessage::Hello(hello) => {
                if hello.protocol_version != PROTOCOL_VERSION {
                    let err = RelayError::VersionMismatch {
                        peer: hello.protocol_version,
                        ours: PROTOCOL_VERSION,
                    };
                    warn!(%peer, "{}", err);
                    return rejected(err);
                }
                debug!(%peer, agent = %hello.agent, topics = hello.topics.len(), "hello");
                match self.directory.apply_hello(&peer, hello) {
                    Ok(()) => Ack::Accepted,
                    Err(e) => rejected(e),
                }
            }
            WireMessage::Advertise { topic, subscribed } => {
                debug!(%peer, topic = %topic, subscribed, "topic advertisement");
                match self.directory.set_topic_interest(&peer, topic, subscribed) {
                    Ok(_) => Ack::Accepted,
                    Err(e) => rejected(e),
                }
            }
            WireMessage::Publish(envelope) => self.handle_publish(peer, envelope),
            WireMessage::Heartbeat { .. } => Ack::Accepted,
        }
    }

    fn handle_publish(&mut self, from: PeerId, envelope: Envelope) -> Ack {
        self.channels.stats.record_received();
        let outcome =
            self.dispatcher
                .on_inbound(from, &envelope, &mut self.router, &self.directory);
        match outcome {
            InboundOutcome::Duplicate => {
                self.channels.stats.record_duplicate();
                trace!(%from, id = %envelope.id.short(), "duplicate message");
                Ack::Duplicate
            }
            InboundOutcome::Looped => {
                self.channels.stats.record_looped();
                trace!(%from, id = %envelope.id.short(), "own message relayed back");
                Ack::Duplicate
            }
            InboundOutcome::Malformed(err) => {
                self.channels.stats.record_malformed();
                warn!(%from, "dropping message: {}", err);
                rejected(err)
            }
            InboundOutcome::Accepted { event, forward } => {
                debug!(
                    %from,
                    topic = %envelope.topic,
                    id = %envelope.id.short(),
                    local = event.is_some(),
                    forward = forward.len(),
                    "message accepted"
                );
                if let Some(event) = event {
                    self.deliver(event);
                }
                for peer in forward {
                    self.channels.stats.record_forwarded();
                    self.send_publish(peer, envelope.clone());
                }
                Ack::Accepted
            }
        }
    }

    /// Hand an event to the delivery thread and the broadcast subscribers.
    fn deliver(&mut self, event: Event) {
        let _ = self.channels.events.send(event.clone());
        match self.channels.delivery.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.channels.stats.record_dropped_frame();
                warn!(
                    topic = %event.topic,
                    id = %event.id.short(),
                    "delivery queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("delivery queue closed");
            }
        }
    }

    fn advertise(&mut self, topic: Topic, subscribed: bool) {
        let peers: Vec<PeerId> = self.directory.connected_peers().copied().collect();
        for peer in peers {
            self.send_frame(
                peer,
                WireMessage::Advertise {
                    topic: topic.clone(),
                    subscribed,
                },
            );
        }
    }

    fn hello(&self) -> Hello {
        Hello {
            protocol_version: PROTOCOL_VERSION,
            agent: agent_version(),
            topics: self.router.topics(),
        }
    }

    fn send_publish(&mut self, peer: PeerId, envelope: Envelope) {
        self.router.mark_sent(peer, envelope.id);
        self.send_frame(peer, WireMessage::Publish(envelope));
    }

    fn send_frame(&mut self, peer: PeerId, frame: WireMessage) {
        let kind = frame.kind();
        match self.outbox.push(peer, frame) {
            Enqueue::Queued => self.pump(peer),
            Enqueue::Dropped => {
                self.channels.stats.record_dropped_frame();
                warn!(%peer, kind, "outbox full, dropping frame");
            }
        }
    }

    /// Put the next queued frame for `peer` on the wire if its link is free.
    fn pump(&mut self, peer: PeerId) {
        if let Some(frame) = self.outbox.take_next(&peer) {
            let request_id = self.swarm.behaviour_mut().flood.send_request(&peer, frame);
            self.outbox.mark_in_flight(peer, request_id, Instant::now());
        }
    }

    fn frame_done(&mut self, peer: PeerId, request_id: OutboundRequestId) {
        if self.outbox.complete(&peer, request_id) {
            self.pump(peer);
        }
    }

    /// Feed peers learned from Kademlia into the dialer.
    fn handle_kad_event(&mut self, event: kad::Event, now: Instant) {
        match event {
            kad::Event::RoutingUpdated {
                peer, addresses, ..
            } => {
                if peer == self.local_peer_id()
                    || self.directory.contains(&peer)
                    || self.directory.is_full()
                {
                    return;
                }
                let addr = match addresses.first().clone().with_p2p(peer) {
                    Ok(addr) | Err(addr) => addr,
                };
                if self.dialer.add_target(addr.clone(), false, now) {
                    debug!(%peer, %addr, "discovered peer via kad");
                }
            }
            kad::Event::OutboundQueryProgressed {
                result: kad::QueryResult::Bootstrap(result),
                ..
            } => match result {
                Ok(ok) => trace!(
                    peer = %ok.peer,
                    remaining = ok.num_remaining,
                    "kad bootstrap step"
                ),
                Err(e) => debug!("kad bootstrap failed: {:?}", e),
            },
            other => trace!(?other, "kad event"),
        }
    }

    /// Start a Kademlia bootstrap query if one is due.
    fn discover(&mut self, now: Instant) {
        if now < self.next_discovery {
            return;
        }
        self.next_discovery = now + self.config.discovery_interval;
        let Some(kad) = self.swarm.behaviour_mut().kad.as_mut() else {
            return;
        };
        match kad.bootstrap() {
            Ok(query) => debug!(?query, "kad bootstrap started"),
            Err(e) => trace!("kad bootstrap skipped: {}", e),
        }
    }

    fn forget_peer(&mut self, peer: &PeerId) {
        self.router.forget_peer(peer);
        let dropped = self.outbox.forget(peer);
        if dropped > 0 {
            debug!(%peer, dropped, "discarded queued frames");
        }
    }

    /// Dials, discovery, heartbeats and liveness eviction.
    fn maintain(&mut self, now: Instant) {
        self.discover(now);

        for (target, addr) in self.dialer.due(now) {
            let opts = DialOpts::unknown_peer_id().address(addr.clone()).build();
            let connection_id = opts.connection_id();
            match self.swarm.dial(opts) {
                Ok(()) => {
                    debug!(%addr, "dialing");
                    self.dialer.dial_started(target, connection_id);
                }
                Err(e) => {
                    if let Some(failure) = self.dialer.dial_failed(target, now) {
                        let err = RelayError::ConnectionError {
                            reason: format!("dial {}: {}", addr, e),
                        };
                        self.report_dial_failure(failure, err);
                    }
                }
            }
        }

        let peers: Vec<PeerId> = self.directory.connected_peers().copied().collect();
        for peer in peers {
            if self
                .outbox
                .needs_heartbeat(&peer, now, self.config.heartbeat_interval)
            {
                self.send_frame(
                    peer,
                    WireMessage::Heartbeat {
                        timestamp: unix_millis(),
                    },
                );
            }
        }

        for peer in self
            .directory
            .stale_peers(now, self.config.liveness_timeout)
        {
            warn!(%peer, timeout = ?self.config.liveness_timeout, "peer went silent, evicting");
            self.channels.stats.record_evicted();
            if let Err(e) = self.directory.remove_peer(&peer) {
                debug!(%peer, "{}", e);
            }
            self.forget_peer(&peer);
            let _ = self.swarm.disconnect_peer_id(peer);
        }
    }

    fn report_dial_failure(&mut self, failure: DialFailure, err: RelayError) {
        self.channels.stats.record_dial_failure();
        if failure.unreachable {
            warn!(
                addr = %failure.addr,
                attempts = failure.failures,
                "{}; marking unreachable",
                err
            );
        } else {
            debug!(
                attempts = failure.failures,
                retry_in = ?failure.retry_in,
                "{}",
                err
            );
        }
    }

    fn publish_snapshot(&mut self) {
        if let Some(snapshot) = self.directory.take_snapshot_if_dirty() {
            self.channels.stats.set_peer_count(snapshot.len());
            self.channels.peers.send_replace(Arc::new(snapshot));
        }
    }
}

fn rejected(err: RelayError) -> Ack {
    Ack::Rejected {
        reason: err.to_string(),
    }
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn unix_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}
