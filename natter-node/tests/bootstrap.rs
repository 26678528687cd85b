//! Bootstrap file flow: a bootstrap node writes its address, a client
//! configured from that file joins and chats.

use std::time::Duration;

use natter_node::config::NodeConfig;
use natter_relay::{BootstrapFile, Node};
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(15);

fn local_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.network.listen_addr = "127.0.0.1:0".to_string();
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_joins_through_bootstrap_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("nested").join("bootstrap.toml");

    let boot = Node::new(local_config().to_relay_config().unwrap()).unwrap();
    boot.start().unwrap();
    boot.subscribe("chat-room").unwrap();
    let addr = timeout(TIMEOUT, boot.wait_for_listen_addr())
        .await
        .expect("bootstrap node never listened")
        .unwrap();
    BootstrapFile::new(&boot.local_peer_id(), &addr)
        .save(&path)
        .unwrap();

    let mut client_config = local_config();
    client_config.network.bootstrap_file = Some(path.to_str().unwrap().to_string());
    let relay_config = client_config.to_relay_config().unwrap();
    assert_eq!(relay_config.boot_nodes.len(), 1);
    assert!(relay_config.boot_nodes[0].ends_with(&boot.local_peer_id().to_string()));

    let client = Node::new(relay_config).unwrap();
    client.start().unwrap();
    client.subscribe("chat-room").unwrap();
    let mut boot_events = boot.subscribe_events();

    // The client learns the bootstrap node is interested before publishing.
    let mut peers = client.watch_peers();
    let boot_id = boot.local_peer_id();
    timeout(
        TIMEOUT,
        peers.wait_for(|snap| {
            snap.get(&boot_id)
                .map(|p| p.topics.iter().any(|t| t.as_str() == "chat-room"))
                .unwrap_or(false)
        }),
    )
    .await
    .expect("client never saw bootstrap interest")
    .unwrap();

    client.send_message("chat-room", "hello bootstrap");
    let event = timeout(TIMEOUT, boot_events.recv())
        .await
        .expect("no event within timeout")
        .unwrap();
    assert_eq!(event.message, "hello bootstrap");
    assert_eq!(event.origin, client.local_peer_id());

    client.shutdown().await.unwrap();
    boot.shutdown().await.unwrap();
}

#[test]
fn test_missing_bootstrap_file_is_config_error() {
    let mut config = local_config();
    config.network.bootstrap_file = Some("/nonexistent/bootstrap.toml".to_string());
    let err = config.to_relay_config().unwrap_err();
    assert!(err.to_string().contains("bootstrap file"));
}
