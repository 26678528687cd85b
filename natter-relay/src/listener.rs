use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

use libp2p::PeerId;
use natter_types::network::Envelope;
use natter_types::primitives::{MessageId, Topic};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::RelayError;
use crate::stats::RelayStats;

/// A message delivered to local listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub topic: Topic,
    /// Payload decoded as UTF-8, with invalid sequences replaced.
    pub message: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    pub id: MessageId,
    /// Node that published the message.
    pub origin: PeerId,
    /// Peer the message arrived from.
    pub source: PeerId,
}

impl Event {
    pub fn from_envelope(envelope: &Envelope, origin: PeerId, source: PeerId) -> Self {
        Self {
            topic: envelope.topic.clone(),
            message: String::from_utf8_lossy(&envelope.payload).into_owned(),
            payload: envelope.payload.clone(),
            id: envelope.id,
            origin,
            source,
        }
    }
}

/// Receives delivered messages.
///
/// Called on the delivery thread, never on the networking task. The returned
/// string is logged at trace level and otherwise unused.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: Event) -> String;
}

impl<F> EventListener for F
where
    F: Fn(Event) -> String + Send + Sync,
{
    fn on_event(&self, event: Event) -> String {
        self(event)
    }
}

/// Handle returned by [`ListenerRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    topic: Topic,
    listener: Arc<dyn EventListener>,
}

#[derive(Default)]
struct Listeners {
    catch_all: Option<Arc<dyn EventListener>>,
    by_topic: Vec<Registration>,
}

/// Topic-keyed listener table with one optional catch-all slot.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Listeners>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catch-all listener.
    pub fn set_default(&self, listener: Arc<dyn EventListener>) {
        self.write().catch_all = Some(listener);
    }

    pub fn clear_default(&self) {
        self.write().catch_all = None;
    }

    /// Register a listener for a single topic.
    pub fn add(&self, topic: Topic, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write().by_topic.push(Registration {
            id,
            topic,
            listener,
        });
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.write();
        let before = listeners.by_topic.len();
        listeners.by_topic.retain(|r| r.id != id);
        listeners.by_topic.len() != before
    }

    pub fn len(&self) -> usize {
        let listeners = self.read();
        listeners.by_topic.len() + usize::from(listeners.catch_all.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener matching `event.topic`.
    ///
    /// Listeners run outside the table lock so they may register or remove
    /// listeners themselves. A panicking listener is reported as a
    /// [`RelayError::DispatchError`] and does not stop the others.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let targets: Vec<Arc<dyn EventListener>> = {
            let listeners = self.read();
            listeners
                .catch_all
                .iter()
                .cloned()
                .chain(
                    listeners
                        .by_topic
                        .iter()
                        .filter(|r| r.topic == event.topic)
                        .map(|r| Arc::clone(&r.listener)),
                )
                .collect()
        };

        let mut report = DispatchReport::default();
        for listener in targets {
            let event = event.clone();
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(reply) => {
                    trace!(reply = %reply, "listener returned");
                    report.invoked += 1;
                }
                Err(panic) => report.failures.push(RelayError::DispatchError {
                    reason: panic_message(panic.as_ref()),
                }),
            }
        }
        report
    }

    fn read(&self) -> RwLockReadGuard<'_, Listeners> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Listeners> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Outcome of one [`ListenerRegistry::dispatch`] call.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Listeners that returned normally.
    pub invoked: usize,
    pub failures: Vec<RelayError>,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("listener panicked: {}", s)
    } else {
        "listener panicked".to_string()
    }
}

/// Drain `events` and hand each one to the registry until the sender closes.
pub fn run_delivery(
    mut events: mpsc::Receiver<Event>,
    registry: Arc<ListenerRegistry>,
    stats: Arc<RelayStats>,
) {
    while let Some(event) = events.blocking_recv() {
        let report = registry.dispatch(&event);
        if report.invoked > 0 {
            stats.record_delivered();
        }
        for failure in report.failures {
            stats.record_listener_failure();
            warn!(topic = %event.topic, id = %event.id.short(), "{}", failure);
        }
    }
    debug!("delivery queue closed");
}

/// Spawn the delivery thread.
pub fn spawn_delivery(
    events: mpsc::Receiver<Event>,
    registry: Arc<ListenerRegistry>,
    stats: Arc<RelayStats>,
) -> Result<JoinHandle<()>, RelayError> {
    std::thread::Builder::new()
        .name("natter-delivery".to_string())
        .spawn(move || run_delivery(events, registry, stats))
        .map_err(|e| RelayError::Runtime {
            reason: format!("failed to spawn delivery thread: {}", e),
        })
}
