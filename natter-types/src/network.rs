use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_PAYLOAD_SIZE;
use crate::error::TypesError;
use crate::primitives::{MessageId, Timestamp, Topic};

/// First frame sent on every new peer link.
///
/// The peer identity itself is authenticated by the transport handshake;
/// `Hello` carries the protocol version and the sender's current topic
/// interests so routing can start immediately.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Hello {
    /// Wire protocol version of the sender.
    pub protocol_version: u8,
    /// Free-form agent string (e.g. "natter/0.3.0").
    pub agent: String,
    /// Topics the sender is subscribed to.
    pub topics: Vec<Topic>,
}

/// A published message as it travels between peers.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Envelope {
    /// Dedup key, see [`MessageId::compute`].
    pub id: MessageId,
    pub topic: Topic,
    /// Peer id bytes of the publishing node.
    pub origin: Vec<u8>,
    /// Per-origin publish counter.
    pub sequence: u64,
    /// Publish time at the origin.
    pub timestamp: Timestamp,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Build an envelope and derive its id.
    pub fn new(
        origin: Vec<u8>,
        sequence: u64,
        topic: Topic,
        payload: Vec<u8>,
        timestamp: Timestamp,
    ) -> Result<Self, TypesError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TypesError::PayloadTooLarge {
                size: payload.len(),
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        let id = MessageId::compute(&origin, sequence, &topic, &payload);
        Ok(Self {
            id,
            topic,
            origin,
            sequence,
            timestamp,
            payload,
        })
    }

    /// Whether `id` matches the envelope contents.
    pub fn id_matches(&self) -> bool {
        self.id == MessageId::compute(&self.origin, self.sequence, &self.topic, &self.payload)
    }
}

/// Frames exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum WireMessage {
    /// Link handshake.
    Hello(Hello),
    /// Topic interest change.
    Advertise { topic: Topic, subscribed: bool },
    /// A payload message.
    Publish(Envelope),
    /// Keep-alive for otherwise idle links.
    Heartbeat { timestamp: Timestamp },
}

impl WireMessage {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello(_) => "hello",
            WireMessage::Advertise { .. } => "advertise",
            WireMessage::Publish(_) => "publish",
            WireMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Response to every frame.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum Ack {
    /// The frame was processed.
    Accepted,
    /// A publish whose id the receiver had already seen.
    Duplicate,
    /// The frame was understood but refused.
    Rejected { reason: String },
}
