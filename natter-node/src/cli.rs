use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::Style;
use natter_relay::{default_bootstrap_path, BootstrapFile, Node};
use rand::RngCore;
use tokio::sync::broadcast::error::RecvError;

use crate::config::{parse_seed, NodeConfig};
use crate::error::NodeError;

#[derive(Parser)]
#[command(name = "natter", about = "natter peer-to-peer chat node", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Overrides shared by the commands that start a node.
#[derive(clap::Args, Debug, Default)]
pub struct NodeArgs {
    /// Path to config file (defaults to ./natter.toml when present)
    #[arg(short, long)]
    pub config: Option<String>,
    /// Override P2P listen address (e.g., "0.0.0.0:4701")
    #[arg(long)]
    pub listen: Option<String>,
    /// Boot node multiaddr to connect to (can be specified multiple times)
    #[arg(long = "boot-node")]
    pub boot_nodes: Vec<String>,
    /// Hex-encoded 32-byte seed for a deterministic peer id
    #[arg(long)]
    pub keypair_seed: Option<String>,
    /// Discover peers on the local network
    #[arg(long)]
    pub mdns: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a chat node and talk on a topic from the terminal
    Run {
        #[command(flatten)]
        node: NodeArgs,
        /// Bootstrap file written by `natter bootstrap`
        #[arg(long)]
        bootstrap_file: Option<String>,
        /// Topic to join and publish on
        #[arg(short, long)]
        topic: Option<String>,
    },
    /// Run a bootstrap node and write its address for clients
    Bootstrap {
        #[command(flatten)]
        node: NodeArgs,
        /// Where to write the bootstrap file (defaults to ~/.natter/bootstrap.toml)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Initialize a new node configuration
    Init {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        dir: String,
    },
    /// Generate a keypair seed and print its peer id
    Keygen,
}

/// Load the config file and apply command-line overrides.
pub fn resolve_config(args: &NodeArgs) -> Result<NodeConfig, NodeError> {
    let mut config = NodeConfig::load_or_default(args.config.as_deref())?;
    if let Some(addr) = &args.listen {
        config.network.listen_addr = addr.clone();
    }
    config.network.boot_nodes.extend(args.boot_nodes.iter().cloned());
    if let Some(seed) = &args.keypair_seed {
        config.network.keypair_seed = Some(seed.clone());
    }
    if args.mdns {
        config.network.enable_mdns = true;
    }
    Ok(config)
}

pub async fn run(cli: Cli) -> Result<(), NodeError> {
    match cli.command {
        Command::Run {
            node,
            bootstrap_file,
            topic,
        } => {
            let mut config = resolve_config(&node)?;
            if bootstrap_file.is_some() {
                config.network.bootstrap_file = bootstrap_file;
            }
            if let Some(topic) = topic {
                config.gossip.topic = topic;
            }
            crate::init_tracing(&config.logging.level);
            crate::banner::print_banner();

            let node = start_node(&config)?;
            node.subscribe(&config.gossip.topic)?;
            print_summary(&node, &config).await?;
            crate::chat::run(node, config.gossip.topic.clone()).await
        }
        Command::Bootstrap { node, output } => {
            let config = resolve_config(&node)?;
            crate::init_tracing(&config.logging.level);
            crate::banner::print_banner();

            let node = start_node(&config)?;
            node.subscribe(&config.gossip.topic)?;
            let address = print_summary(&node, &config).await?;

            let path = output
                .map(PathBuf::from)
                .unwrap_or_else(default_bootstrap_path);
            BootstrapFile::new(&node.local_peer_id(), &address).save(&path)?;
            tracing::info!(path = %path.display(), %address, "bootstrap file written");

            relay_until_interrupted(&node).await;
            node.shutdown().await?;
            Ok(())
        }
        Command::Init { dir } => {
            crate::init_tracing("info");
            let path = NodeConfig::init(&dir)?;
            tracing::info!("Node configuration written to {}", path.display());
            Ok(())
        }
        Command::Keygen => {
            let mut seed = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut seed);
            let seed_hex = hex::encode(seed);
            let config = natter_relay::RelayConfig {
                keypair_seed: Some(parse_seed(&seed_hex)?),
                ..natter_relay::RelayConfig::default()
            };
            let node = Node::new(config)?;
            println!("Seed: {}", seed_hex);
            println!("Peer ID: {}", node.local_peer_id());
            Ok(())
        }
    }
}

fn start_node(config: &NodeConfig) -> Result<Node, NodeError> {
    let node = Node::new(config.to_relay_config()?)?;
    node.start()?;
    Ok(node)
}

/// Print identity and listen address once the node is listening.
async fn print_summary(
    node: &Node,
    config: &NodeConfig,
) -> Result<natter_relay::Multiaddr, NodeError> {
    let dim = Style::new().dim();
    let cyan = Style::new().cyan();
    let address = node.wait_for_listen_addr().await?;

    println!("  {} {}", dim.apply_to("Peer ID "), cyan.apply_to(node.local_peer_id()));
    println!("  {} {}", dim.apply_to("Listen  "), cyan.apply_to(&address));
    println!("  {} {}", dim.apply_to("Topic   "), cyan.apply_to(&config.gossip.topic));
    if !config.network.boot_nodes.is_empty() {
        println!(
            "  {} {}",
            dim.apply_to("Peers   "),
            cyan.apply_to(config.network.boot_nodes.join(", "))
        );
    }
    println!();
    Ok(address)
}

/// Log relayed traffic until Ctrl-C.
async fn relay_until_interrupted(node: &Node) {
    let mut events = node.subscribe_events();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => tracing::info!(
                    topic = %event.topic,
                    origin = %event.origin,
                    "message: {}",
                    event.message
                ),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event log fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "natter",
            "run",
            "--listen",
            "127.0.0.1:0",
            "--boot-node",
            "/ip4/127.0.0.1/tcp/4701",
            "--boot-node",
            "/ip4/127.0.0.1/tcp/4702",
            "--topic",
            "lobby",
            "--mdns",
        ])
        .unwrap();
        match cli.command {
            Command::Run { node, topic, .. } => {
                assert_eq!(node.listen.as_deref(), Some("127.0.0.1:0"));
                assert_eq!(node.boot_nodes.len(), 2);
                assert!(node.mdns);
                assert_eq!(topic.as_deref(), Some("lobby"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_bootstrap_output() {
        let cli = Cli::try_parse_from(["natter", "bootstrap", "-o", "/tmp/boot.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Bootstrap { output: Some(ref o), .. } if o == "/tmp/boot.toml"
        ));
    }

    #[test]
    fn test_resolve_config_applies_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let path = NodeConfig::init(tmp.path().to_str().unwrap()).unwrap();
        let args = NodeArgs {
            config: Some(path.to_str().unwrap().to_string()),
            listen: Some("127.0.0.1:9999".to_string()),
            boot_nodes: vec!["/ip4/10.0.0.1/tcp/4701".to_string()],
            keypair_seed: Some("11".repeat(32)),
            mdns: true,
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.network.listen_addr, "127.0.0.1:9999");
        assert_eq!(config.network.boot_nodes.len(), 1);
        assert!(config.network.enable_mdns);
        assert!(config.to_relay_config().unwrap().keypair_seed.is_some());
    }

    #[test]
    fn test_resolve_config_missing_file_is_error() {
        let args = NodeArgs {
            config: Some("/nonexistent/natter.toml".to_string()),
            ..NodeArgs::default()
        };
        assert!(resolve_config(&args).is_err());
    }
}
