//! The process-wide node. Kept in its own test binary since the node lives
//! for the whole process.

use std::sync::Arc;
use std::time::Duration;

use natter_bindings::Event;
use natter_relay::{RelayConfig, RelayError};

#[test]
fn test_global_lifecycle() {
    // Nothing to talk to yet: dropped with a warning, not a panic.
    natter_bindings::send_message("chat-room", "too early");
    assert!(natter_bindings::local_peer_id().is_none());

    natter_bindings::set_listener(Arc::new(|_event: Event| String::new()));
    natter_bindings::start_with(RelayConfig::local()).unwrap();
    assert!(natter_bindings::local_peer_id().is_some());
    assert!(matches!(
        natter_bindings::start(),
        Err(RelayError::AlreadyStarted)
    ));

    natter_bindings::send_message("chat-room", "hello");
    natter_bindings::send_message("bad\ntopic", "ignored");

    std::thread::sleep(Duration::from_millis(200));
    natter_bindings::shutdown().unwrap();
    assert!(matches!(
        natter_bindings::start(),
        Err(RelayError::NotRunning)
    ));
}
