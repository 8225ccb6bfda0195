use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::MailboxError;
use crate::types::{DeviceId, Path};

/// One value shared at a path.
///
/// A serializing mailbox only ever buffers `Serialized` payloads; an
/// `InMemory` value reaching it means the sender bypassed the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Bytes produced by the configured [`Codec`].
    Serialized(Vec<u8>),
    /// A value that never crossed a serialization boundary.
    InMemory(serde_json::Value),
}

impl Payload {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Serialized(bytes) => Some(bytes),
            Payload::InMemory(_) => None,
        }
    }
}

/// A message as seen by the inbound side of the mailbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender_id: DeviceId,
    pub shared_data: BTreeMap<Path, Payload>,
}

impl Message {
    pub fn new(sender_id: DeviceId) -> Self {
        Self {
            sender_id,
            shared_data: BTreeMap::new(),
        }
    }

    /// Whether every payload is in its raw-bytes form.
    pub fn is_serialized(&self) -> bool {
        self.shared_data
            .values()
            .all(|payload| matches!(payload, Payload::Serialized(_)))
    }
}

/// Wire envelope: one round of data from a sender to one recipient.
///
/// Encoded as a whole by [`Codec::encode_envelope`]; each value in
/// `shared_data` was already encoded by the same codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedMessage {
    pub sender_id: DeviceId,
    pub shared_data: BTreeMap<Path, Vec<u8>>,
}

impl From<SerializedMessage> for Message {
    fn from(message: SerializedMessage) -> Self {
        Self {
            sender_id: message.sender_id,
            shared_data: message
                .shared_data
                .into_iter()
                .map(|(path, bytes)| (path, Payload::Serialized(bytes)))
                .collect(),
        }
    }
}

/// Builds [`SerializedMessage`]s for the local device with the mailbox codec.
///
/// Handed to [`OutboundEnvelope::message_for`] so the engine never needs to
/// know which format family is in use.
#[derive(Debug, Clone, Copy)]
pub struct MessageFactory<'a> {
    sender_id: DeviceId,
    codec: &'a Codec,
}

impl<'a> MessageFactory<'a> {
    pub fn new(sender_id: DeviceId, codec: &'a Codec) -> Self {
        Self { sender_id, codec }
    }

    pub fn sender_id(&self) -> DeviceId {
        self.sender_id
    }

    /// Encode a single value with the mailbox codec.
    pub fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<Vec<u8>, MailboxError> {
        self.codec.encode(value)
    }

    /// Start an empty message from the local device.
    pub fn builder(&self) -> MessageBuilder<'a> {
        MessageBuilder {
            factory: *self,
            shared_data: BTreeMap::new(),
        }
    }
}

/// Accumulates encoded values path by path.
#[derive(Debug)]
pub struct MessageBuilder<'a> {
    factory: MessageFactory<'a>,
    shared_data: BTreeMap<Path, Vec<u8>>,
}

impl MessageBuilder<'_> {
    /// Encode `value` and store it at `path`, replacing any previous value.
    pub fn insert<V: Serialize + ?Sized>(
        mut self,
        path: impl Into<Path>,
        value: &V,
    ) -> Result<Self, MailboxError> {
        let bytes = self.factory.encode(value)?;
        self.shared_data.insert(path.into(), bytes);
        Ok(self)
    }

    pub fn build(self) -> SerializedMessage {
        SerializedMessage {
            sender_id: self.factory.sender_id,
            shared_data: self.shared_data,
        }
    }
}

/// Outbound round data, already shaped per recipient by the engine.
///
/// The mailbox asks for one message per neighbor and never inspects
/// how the content was chosen.
pub trait OutboundEnvelope {
    fn message_for(
        &self,
        recipient: DeviceId,
        factory: &MessageFactory<'_>,
    ) -> Result<SerializedMessage, MailboxError>;
}

/// A simple [`OutboundEnvelope`]: the same values for everybody, with
/// optional per-recipient overrides.
#[derive(Debug, Clone)]
pub struct RoundEnvelope<V> {
    shared: BTreeMap<Path, V>,
    overrides: HashMap<DeviceId, BTreeMap<Path, V>>,
}

impl<V> RoundEnvelope<V> {
    pub fn new() -> Self {
        Self {
            shared: BTreeMap::new(),
            overrides: HashMap::new(),
        }
    }

    /// Share `value` at `path` with every neighbor.
    pub fn share(mut self, path: impl Into<Path>, value: V) -> Self {
        self.shared.insert(path.into(), value);
        self
    }

    /// Share `value` at `path` with `recipient` only, taking precedence
    /// over the common value.
    pub fn share_with(mut self, recipient: DeviceId, path: impl Into<Path>, value: V) -> Self {
        self.overrides
            .entry(recipient)
            .or_default()
            .insert(path.into(), value);
        self
    }
}

impl<V> Default for RoundEnvelope<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Serialize> OutboundEnvelope for RoundEnvelope<V> {
    fn message_for(
        &self,
        recipient: DeviceId,
        factory: &MessageFactory<'_>,
    ) -> Result<SerializedMessage, MailboxError> {
        let mut builder = factory.builder();
        for (path, value) in &self.shared {
            builder = builder.insert(path.clone(), value)?;
        }
        if let Some(specific) = self.overrides.get(&recipient) {
            for (path, value) in specific {
                builder = builder.insert(path.clone(), value)?;
            }
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(n: u128) -> DeviceId {
        DeviceId::from_u128(n)
    }

    #[test]
    fn serialized_message_converts_to_serialized_payloads() {
        let mut shared_data = BTreeMap::new();
        shared_data.insert(Path::new("count"), vec![3]);
        let message: Message = SerializedMessage {
            sender_id: device(1),
            shared_data,
        }
        .into();

        assert!(message.is_serialized());
        assert_eq!(
            message.shared_data.get(&Path::new("count")),
            Some(&Payload::Serialized(vec![3]))
        );
    }

    #[test]
    fn in_memory_payload_is_not_serialized() {
        let mut message = Message::new(device(1));
        message
            .shared_data
            .insert(Path::new("a"), Payload::Serialized(vec![1]));
        message
            .shared_data
            .insert(Path::new("b"), Payload::InMemory(serde_json::json!(1)));
        assert!(!message.is_serialized());
        assert_eq!(message.shared_data[&Path::new("b")].as_bytes(), None);
    }

    #[test]
    fn round_envelope_applies_overrides_per_recipient() {
        let codec = Codec::json();
        let factory = MessageFactory::new(device(9), &codec);
        let envelope = RoundEnvelope::new()
            .share("count", 1u32)
            .share_with(device(2), "count", 42u32);

        let for_one = envelope.message_for(device(1), &factory).unwrap();
        let for_two = envelope.message_for(device(2), &factory).unwrap();

        assert_eq!(for_one.sender_id, device(9));
        assert_eq!(for_one.shared_data[&Path::new("count")], b"1".to_vec());
        assert_eq!(for_two.shared_data[&Path::new("count")], b"42".to_vec());
    }

    #[test]
    fn builder_replaces_existing_path() {
        let codec = Codec::json();
        let factory = MessageFactory::new(device(1), &codec);
        let message = factory
            .builder()
            .insert("x", &1u8)
            .unwrap()
            .insert("x", &2u8)
            .unwrap()
            .build();
        assert_eq!(message.shared_data.len(), 1);
        assert_eq!(message.shared_data[&Path::new("x")], b"2".to_vec());
    }
}
