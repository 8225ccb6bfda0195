//! Echo mailbox layer.
//!
//! Heartbeat-based neighbor discovery and per-round exchange of
//! serialized field data between devices, on top of a topic-based
//! publish/subscribe broker.
//!
//! Wire format: JSON (text) or MessagePack (binary), chosen per mailbox.

pub mod binding;
pub mod broker;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod neighbors;
pub mod topics;
pub mod types;

pub use binding::{Inbound, TransportBinding};
pub use broker::{Broker, DisconnectReason, InboundFrame, LocalBroker, LocalClient, Qos, Subscription};
pub use buffer::{MessageBuffer, TimedMessage};
pub use codec::{Codec, FormatFamily};
pub use config::MailboxConfig;
pub use error::MailboxError;
pub use mailbox::{
    BrokerMailbox, DataSharingMethod, InboundView, Mailbox, MailboxState, NeighborsData,
};
pub use message::{
    Message, MessageBuilder, MessageFactory, OutboundEnvelope, Payload, RoundEnvelope,
    SerializedMessage,
};
pub use neighbors::NeighborTable;
pub use topics::{topic_matches, TopicClass, TopicScheme, DEFAULT_NAMESPACE};
pub use types::{now_ms, DeviceId, Path};
