//! Networking core for the natter P2P chat node.
//!
//! Built on libp2p: a request-response flood protocol carries topic
//! advertisements and published messages between peers, with identify,
//! Kademlia and optional mDNS for discovery. [`Node`] is the entry point; it owns no
//! global state and can be instantiated any number of times per process.

pub mod behaviour;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod node;
pub mod protocol;
pub mod relay;
pub mod router;
pub mod seen;
pub mod stats;
pub mod transport;

pub use bootstrap::{default_bootstrap_path, BootstrapFile, BootstrapInfo};
pub use config::{BackoffConfig, RelayConfig};
pub use directory::{DirectorySnapshot, PeerSummary};
pub use error::RelayError;
pub use listener::{Event, EventListener, ListenerId};
pub use node::{Node, NodeState};
pub use stats::StatsSnapshot;

pub use libp2p::{Multiaddr, PeerId};
