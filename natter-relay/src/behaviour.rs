use libp2p::identity::Keypair;
use libp2p::kad::{self, store::MemoryStore};
use libp2p::mdns;
use libp2p::request_response;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::NetworkBehaviour;
use libp2p::StreamProtocol;

use crate::codec::FloodCodec;
use crate::protocol::{agent_version, FLOOD_PROTOCOL, IDENTIFY_PROTOCOL, KAD_PROTOCOL};
use natter_types::constants::FRAME_TIMEOUT;

/// Combined network behaviour for a natter node.
#[derive(NetworkBehaviour)]
pub struct NatterBehaviour {
    /// Request-response carrying flood frames, one ack per frame.
    pub flood: request_response::Behaviour<FloodCodec>,
    /// Identify protocol for peer identification.
    pub identify: libp2p::identify::Behaviour,
    /// Routing table of peers-of-peers, present only when enabled.
    pub kad: Toggle<kad::Behaviour<MemoryStore>>,
    /// Local network discovery, present only when enabled.
    pub mdns: Toggle<mdns::tokio::Behaviour>,
}

/// Build a NatterBehaviour from a keypair.
///
/// Returns `Result<NatterBehaviour, Box<dyn Error + Send + Sync>>` to conform
/// to the `TryIntoBehaviour` trait expected by `SwarmBuilder::with_behaviour`.
pub fn build_behaviour(
    keypair: &Keypair,
    enable_mdns: bool,
    enable_kad: bool,
) -> Result<NatterBehaviour, Box<dyn std::error::Error + Send + Sync>> {
    // --- Request-Response ---
    let protocol = StreamProtocol::try_from_owned(FLOOD_PROTOCOL.to_string())
        .map_err(|e| format!("invalid protocol: {:?}", e))?;

    let flood = request_response::Behaviour::with_codec(
        FloodCodec,
        [(protocol, request_response::ProtocolSupport::Full)],
        request_response::Config::default().with_request_timeout(FRAME_TIMEOUT),
    );

    // --- Identify ---
    let identify = libp2p::identify::Behaviour::new(
        libp2p::identify::Config::new(IDENTIFY_PROTOCOL.to_string(), keypair.public())
            .with_agent_version(agent_version()),
    );

    // --- Kademlia ---
    let kad = if enable_kad {
        let local_peer_id = keypair.public().to_peer_id();
        let protocol = StreamProtocol::try_from_owned(KAD_PROTOCOL.to_string())
            .map_err(|e| format!("invalid kad protocol: {:?}", e))?;
        let mut behaviour = kad::Behaviour::with_config(
            local_peer_id,
            MemoryStore::new(local_peer_id),
            kad::Config::new(protocol),
        );
        // Answer queries even without a confirmed external address.
        behaviour.set_mode(Some(kad::Mode::Server));
        Some(behaviour)
    } else {
        None
    };

    // --- mDNS ---
    let mdns = if enable_mdns {
        let behaviour =
            mdns::tokio::Behaviour::new(mdns::Config::default(), keypair.public().to_peer_id())
                .map_err(|e| format!("mdns behaviour: {}", e))?;
        Some(behaviour)
    } else {
        None
    };

    Ok(NatterBehaviour {
        flood,
        identify,
        kad: Toggle::from(kad),
        mdns: Toggle::from(mdns),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_behaviour_without_mdns() {
        let keypair = Keypair::generate_ed25519();
        let behaviour = build_behaviour(&keypair, false, true).expect("behaviour");
        assert!(!behaviour.mdns.is_enabled());
        assert!(behaviour.kad.is_enabled());
    }

    #[test]
    fn test_kad_can_be_disabled() {
        let keypair = Keypair::generate_ed25519();
        let behaviour = build_behaviour(&keypair, false, false).expect("behaviour");
        assert!(!behaviour.kad.is_enabled());
    }
}
