//! `start()` with no explicit config boots from the bootstrap file in the
//! home directory. Kept in its own test binary since it moves `HOME`.

use std::time::{Duration, Instant};

use natter_bindings::{ChatNode, DEFAULT_TOPIC};
use natter_relay::{default_bootstrap_path, BootstrapFile, RelayConfig};
use natter_types::primitives::Topic;

const TIMEOUT: Duration = Duration::from_secs(15);

#[test]
fn test_start_joins_node_from_default_bootstrap_file() {
    let home = tempfile::tempdir().unwrap();
    std::env::set_var("HOME", home.path());

    let boot = ChatNode::new(RelayConfig::local()).unwrap();
    boot.start().unwrap();
    let addr = boot.wait_for_listen_addr(TIMEOUT).unwrap();
    let path = default_bootstrap_path();
    assert!(path.starts_with(home.path()));
    BootstrapFile::new(&boot.local_peer_id(), &addr)
        .save(&path)
        .unwrap();

    natter_bindings::start().unwrap();
    let client = natter_bindings::local_peer_id().unwrap();

    // The client's hello carries the default topic once it reaches the boot node.
    let topic = Topic::new(DEFAULT_TOPIC).unwrap();
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let joined = boot
            .peers()
            .get(&client)
            .map(|p| p.topics.contains(&topic))
            .unwrap_or(false);
        if joined {
            break;
        }
        assert!(Instant::now() < deadline, "client never reached the boot node");
        std::thread::sleep(Duration::from_millis(50));
    }

    natter_bindings::shutdown().unwrap();
    boot.shutdown().unwrap();
}
