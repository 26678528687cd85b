use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::MAX_TOPIC_LEN;
use crate::error::TypesError;

/// Unix timestamp in milliseconds.
pub type Timestamp = u64;

/// Identifier of a published message.
///
/// Derived as `BLAKE3(origin || sequence || topic || payload)` with each
/// variable-length field length-prefixed. Dedup everywhere in the node is
/// keyed on this value alone.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct MessageId(pub [u8; 32]);

impl MessageId {
    /// Compute the id of a message.
    pub fn compute(origin: &[u8], sequence: u64, topic: &Topic, payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(origin.len() as u32).to_le_bytes());
        hasher.update(origin);
        hasher.update(&sequence.to_le_bytes());
        hasher.update(&(topic.as_str().len() as u32).to_le_bytes());
        hasher.update(topic.as_str().as_bytes());
        hasher.update(payload);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 bytes in hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.short())
    }
}

/// A validated topic name.
///
/// Topics are non-empty, at most [`MAX_TOPIC_LEN`] bytes and free of control
/// characters. The check also runs when a topic is decoded off the wire.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Result<Self, TypesError> {
        let name = name.into();
        validate_topic(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Validate a topic name.
pub fn validate_topic(name: &str) -> Result<(), TypesError> {
    if name.is_empty() {
        return Err(TypesError::InvalidTopic {
            reason: "topic must not be empty".to_string(),
        });
    }
    if name.len() > MAX_TOPIC_LEN {
        return Err(TypesError::InvalidTopic {
            reason: format!(
                "topic must be at most {} bytes, got {}",
                MAX_TOPIC_LEN,
                name.len()
            ),
        });
    }
    if let Some(c) = name.chars().find(|c| c.is_control()) {
        return Err(TypesError::InvalidTopic {
            reason: format!("topic contains control character {:?}", c),
        });
    }
    Ok(())
}

impl BorshDeserialize for Topic {
    fn deserialize_reader<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
        let raw = String::deserialize_reader(reader)?;
        Topic::new(raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl TryFrom<String> for Topic {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::new(value)
    }
}

impl FromStr for Topic {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::new(s)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_topics() {
        assert!(Topic::new("chat").is_ok());
        assert!(Topic::new("chat-room/v1").is_ok());
        assert!(Topic::new("sala de café").is_ok());
    }

    #[test]
    fn test_empty_topic_rejected() {
        assert!(matches!(
            Topic::new(""),
            Err(TypesError::InvalidTopic { .. })
        ));
    }

    #[test]
    fn test_long_topic_rejected() {
        let name = "a".repeat(MAX_TOPIC_LEN + 1);
        assert!(Topic::new(name).is_err());
        let name = "a".repeat(MAX_TOPIC_LEN);
        assert!(Topic::new(name).is_ok());
    }

    #[test]
    fn test_control_character_rejected() {
        assert!(Topic::new("chat\n").is_err());
        assert!(Topic::new("a\u{0}b").is_err());
    }

    #[test]
    fn test_borsh_decode_validates_topic() {
        // A topic that was never constructed through Topic::new.
        let bytes = borsh::to_vec(&String::new()).unwrap();
        assert!(Topic::try_from_slice(&bytes).is_err());

        let bytes = borsh::to_vec(&"chat".to_string()).unwrap();
        assert_eq!(Topic::try_from_slice(&bytes).unwrap().as_str(), "chat");
    }

    #[test]
    fn test_serde_validates_topic() {
        let ok: Topic = serde_json::from_str("\"chat\"").unwrap();
        assert_eq!(ok.as_str(), "chat");
        assert!(serde_json::from_str::<Topic>("\"\"").is_err());
    }

    #[test]
    fn test_message_id_depends_on_every_field() {
        let topic = Topic::new("chat").unwrap();
        let other = Topic::new("news").unwrap();
        let base = MessageId::compute(b"peer-a", 1, &topic, b"hi");
        assert_eq!(base, MessageId::compute(b"peer-a", 1, &topic, b"hi"));
        assert_ne!(base, MessageId::compute(b"peer-b", 1, &topic, b"hi"));
        assert_ne!(base, MessageId::compute(b"peer-a", 2, &topic, b"hi"));
        assert_ne!(base, MessageId::compute(b"peer-a", 1, &other, b"hi"));
        assert_ne!(base, MessageId::compute(b"peer-a", 1, &topic, b"ho"));
    }

    #[test]
    fn test_message_id_display() {
        let id = MessageId([0xab; 32]);
        assert_eq!(id.to_string().len(), 64);
        assert_eq!(id.short(), "abababababababab");
    }
}
