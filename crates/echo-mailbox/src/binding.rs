//! Transport binding: maps the mailbox onto topic-based publish/subscribe.
//!
//! Owns the [`Broker`] session: subscribes to every heartbeat and to this
//! device's payload topic, publishes heartbeats and envelopes, and turns
//! inbound frames into [`Inbound`] events. Frames that cannot be understood
//! are logged and dropped here; they never reach the mailbox.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::broker::{Broker, DisconnectReason, InboundFrame, Qos, Subscription};
use crate::codec::Codec;
use crate::error::MailboxError;
use crate::message::SerializedMessage;
use crate::topics::{TopicClass, TopicScheme};
use crate::types::DeviceId;

/// A frame the mailbox should act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A heartbeat from the given device.
    Heartbeat(DeviceId),
    /// A decoded envelope addressed to this device.
    Message(SerializedMessage),
}

pub struct TransportBinding<B> {
    broker: B,
    device_id: DeviceId,
    codec: Codec,
    topics: TopicScheme,
    shut_down: AtomicBool,
}

impl<B: Broker> TransportBinding<B> {
    pub fn new(broker: B, device_id: DeviceId, codec: Codec, topics: TopicScheme) -> Self {
        Self {
            broker,
            device_id,
            codec,
            topics,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    /// Connect and subscribe. Returns the inbound frame stream.
    pub async fn start(
        &self,
        host: &str,
        port: u16,
    ) -> Result<mpsc::Receiver<InboundFrame>, MailboxError> {
        let client_id = self.device_id.to_string();
        let frames = self.broker.connect(host, port, &client_id).await?;
        tracing::info!(%host, port, device = %self.device_id, "connected to the broker");

        let subscriptions = [
            // Heartbeats: fire and forget.
            Subscription::new(self.topics.heartbeat_wildcard(), Qos::AtMostOnce),
            // Payloads: acknowledged.
            Subscription::new(self.topics.device_topic(&self.device_id), Qos::AtLeastOnce),
        ];
        self.broker.subscribe(&subscriptions).await?;
        Ok(frames)
    }

    /// Announce this device with an empty heartbeat frame.
    pub async fn publish_heartbeat(&self) -> Result<(), MailboxError> {
        self.broker
            .publish(
                &self.topics.heartbeat_topic(&self.device_id),
                Bytes::new(),
                Qos::AtMostOnce,
                false,
            )
            .await
    }

    /// Encode `message` and publish it on `recipient`'s payload topic.
    pub async fn send(
        &self,
        recipient: DeviceId,
        message: &SerializedMessage,
    ) -> Result<(), MailboxError> {
        let payload = self.codec.encode_envelope(message)?;
        tracing::debug!(to = %recipient, from = %self.device_id, bytes = payload.len(), "sending message");
        self.broker
            .publish(
                &self.topics.device_topic(&recipient),
                Bytes::from(payload),
                Qos::AtLeastOnce,
                false,
            )
            .await
    }

    /// Classify and decode an inbound frame.
    ///
    /// Returns `None` for frames that are dropped: foreign topics, payloads
    /// addressed to someone else, bad device ids and undecodable envelopes.
    pub fn route(&self, frame: &InboundFrame) -> Option<Inbound> {
        match self.topics.classify(&frame.topic)? {
            TopicClass::Heartbeat(suffix) => match suffix.parse::<DeviceId>() {
                Ok(id) => Some(Inbound::Heartbeat(id)),
                Err(e) => {
                    tracing::warn!(topic = %frame.topic, "dropping heartbeat: {e}");
                    None
                }
            },
            TopicClass::Device(suffix) => {
                if suffix != self.device_id.to_string() {
                    return None;
                }
                match self.codec.decode_envelope(&frame.payload) {
                    Ok(message) => {
                        tracing::debug!(from = %message.sender_id, "received message");
                        Some(Inbound::Message(message))
                    }
                    Err(e) => {
                        tracing::warn!(topic = %frame.topic, "failed to deserialize message: {e}");
                        None
                    }
                }
            }
        }
    }

    /// Best-effort disconnect. Only the first call reaches the broker.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(device = %self.device_id, "disconnecting from the broker");
        if let Err(e) = self.broker.disconnect(DisconnectReason::WithWillMessage).await {
            tracing::warn!("disconnect failed: {e}");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::types::Path;
    use std::collections::BTreeMap;

    fn device(n: u128) -> DeviceId {
        DeviceId::from_u128(n)
    }

    fn binding(codec: Codec) -> (TransportBinding<MockBroker>, MockBroker) {
        let broker = MockBroker::new();
        let binding = TransportBinding::new(broker.clone(), device(1), codec, TopicScheme::default());
        (binding, broker)
    }

    fn frame(topic: String, payload: Vec<u8>) -> InboundFrame {
        InboundFrame {
            topic,
            payload: Bytes::from(payload),
            qos: Qos::AtLeastOnce,
            retain: false,
        }
    }

    fn envelope(sender: DeviceId) -> SerializedMessage {
        let mut shared_data = BTreeMap::new();
        shared_data.insert(Path::new("count"), b"3".to_vec());
        SerializedMessage {
            sender_id: sender,
            shared_data,
        }
    }

    #[tokio::test]
    async fn start_subscribes_with_delivery_classes() {
        let (binding, broker) = binding(Codec::json());
        binding.start("localhost", 1883).await.unwrap();

        let subs = broker.subscriptions();
        assert_eq!(
            subs,
            vec![
                Subscription::new("Echo/heartbeat/+", Qos::AtMostOnce),
                Subscription::new(
                    "Echo/device/00000000-0000-0000-0000-000000000001",
                    Qos::AtLeastOnce
                ),
            ]
        );
    }

    #[tokio::test]
    async fn heartbeat_is_empty_and_best_effort() {
        let (binding, broker) = binding(Codec::json());
        binding.publish_heartbeat().await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, binding.topics().heartbeat_topic(&device(1)));
        assert!(published[0].payload.is_empty());
        assert_eq!(published[0].qos, Qos::AtMostOnce);
        assert!(!published[0].retain);
    }

    #[tokio::test]
    async fn send_targets_recipient_topic() {
        let (binding, broker) = binding(Codec::msgpack());
        binding.send(device(2), &envelope(device(1))).await.unwrap();

        let published = broker.published();
        assert_eq!(published[0].topic, binding.topics().device_topic(&device(2)));
        assert_eq!(published[0].qos, Qos::AtLeastOnce);
        let decoded = Codec::msgpack().decode_envelope(&published[0].payload).unwrap();
        assert_eq!(decoded, envelope(device(1)));
    }

    #[tokio::test]
    async fn send_propagates_publish_failure() {
        let (binding, broker) = binding(Codec::json());
        broker.set_fail_publishes(true);
        let err = binding.send(device(2), &envelope(device(1))).await.unwrap_err();
        assert!(matches!(err, MailboxError::Transport(_)));
    }

    #[test]
    fn route_heartbeat_extracts_sender() {
        let (binding, _) = binding(Codec::json());
        let topic = binding.topics().heartbeat_topic(&device(7));
        assert_eq!(
            binding.route(&frame(topic, vec![])),
            Some(Inbound::Heartbeat(device(7)))
        );
    }

    #[test]
    fn route_drops_bad_heartbeat_id() {
        let (binding, _) = binding(Codec::json());
        assert_eq!(binding.route(&frame("Echo/heartbeat/nope".into(), vec![])), None);
    }

    #[test]
    fn route_decodes_own_payload() {
        let (binding, _) = binding(Codec::json());
        let bytes = Codec::json().encode_envelope(&envelope(device(2))).unwrap();
        let topic = binding.topics().device_topic(&device(1));
        assert_eq!(
            binding.route(&frame(topic, bytes)),
            Some(Inbound::Message(envelope(device(2))))
        );
    }

    #[test]
    fn route_drops_undecodable_payload() {
        let (binding, _) = binding(Codec::json());
        let bytes = Codec::msgpack().encode_envelope(&envelope(device(2))).unwrap();
        let topic = binding.topics().device_topic(&device(1));
        assert_eq!(binding.route(&frame(topic, bytes)), None);
    }

    #[test]
    fn route_ignores_other_devices_and_foreign_topics() {
        let (binding, _) = binding(Codec::json());
        let bytes = Codec::json().encode_envelope(&envelope(device(2))).unwrap();
        let other = binding.topics().device_topic(&device(3));
        assert_eq!(binding.route(&frame(other, bytes.clone())), None);
        assert_eq!(binding.route(&frame("Elsewhere/device/x".into(), bytes)), None);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (binding, broker) = binding(Codec::json());
        binding.shutdown().await;
        binding.shutdown().await;
        assert!(binding.is_shut_down());
        assert_eq!(broker.disconnects(), vec![DisconnectReason::WithWillMessage]);
    }
}
