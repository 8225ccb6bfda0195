//! MessageBuffer: the latest inbound message per sender.
//!
//! Expiry is evaluated when the buffer is read: a read evicts every entry
//! older than the retention window before answering.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::error::MailboxError;
use crate::message::{Message, Payload};
use crate::neighbors::retention_ms;
use crate::types::{DeviceId, Path};

/// A buffered message and the time it was received (Unix ms).
#[derive(Debug, Clone, PartialEq)]
pub struct TimedMessage {
    pub message: Message,
    pub received_at: u64,
}

#[derive(Debug, Default)]
pub struct MessageBuffer {
    messages: HashMap<DeviceId, TimedMessage>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `message` for `sender_id`, replacing whatever was there.
    pub fn put(&mut self, sender_id: DeviceId, message: Message, timestamp: u64) {
        self.messages.insert(
            sender_id,
            TimedMessage {
                message,
                received_at: timestamp,
            },
        );
    }

    /// Evict expired entries and return the senders still live at `now`.
    pub fn current_view(&mut self, retention: Duration, now: u64) -> BTreeSet<DeviceId> {
        self.sweep_at(retention, now);
        self.messages.keys().copied().collect()
    }

    /// Remove every entry older than `retention`. Returns removed senders.
    pub fn sweep_at(&mut self, retention: Duration, now: u64) -> Vec<DeviceId> {
        let retention = retention_ms(retention);
        let mut removed = vec![];
        self.messages.retain(|&sender, timed| {
            if now.saturating_sub(timed.received_at) > retention {
                removed.push(sender);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Decode the value at `path` from every live message carrying it.
    ///
    /// Entries older than `retention` at `now` are ignored without being
    /// removed. Senders whose message has no value at `path` are left out.
    /// A live message holding any payload that is not raw bytes fails the
    /// whole read with [`MailboxError::MalformedMessage`]; a decode failure
    /// is returned as is.
    pub fn data_at<V, F>(
        &self,
        path: &Path,
        retention: Duration,
        now: u64,
        mut decode: F,
    ) -> Result<HashMap<DeviceId, V>, MailboxError>
    where
        F: FnMut(&[u8]) -> Result<V, MailboxError>,
    {
        let retention = retention_ms(retention);
        let mut out = HashMap::with_capacity(self.messages.len());
        for (&sender, timed) in &self.messages {
            if now.saturating_sub(timed.received_at) > retention {
                continue;
            }
            if !timed.message.is_serialized() {
                return Err(MailboxError::MalformedMessage { sender });
            }
            let Some(Payload::Serialized(bytes)) = timed.message.shared_data.get(path) else {
                continue;
            };
            out.insert(sender, decode(bytes.as_slice())?);
        }
        Ok(out)
    }

    pub fn get(&self, sender_id: &DeviceId) -> Option<&TimedMessage> {
        self.messages.get(sender_id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
