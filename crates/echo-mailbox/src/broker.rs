use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::MailboxError;
use crate::topics::topic_matches;

/// Inbound queue depth per connected client.
const INBOUND_QUEUE: usize = 1024;

/// Delivery class requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qos {
    /// Fire and forget, no acknowledgment.
    AtMostOnce,
    /// Acknowledged by the broker (PUBACK), single attempt from our side.
    AtLeastOnce,
}

/// Why a client disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Normal,
    /// Ask the broker to publish the client's will, announcing the departure.
    WithWillMessage,
}

/// A topic filter and the delivery class for frames matching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: String,
    pub qos: Qos,
}

impl Subscription {
    pub fn new(filter: impl Into<String>, qos: Qos) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

/// A frame delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

/// Publish/subscribe capability driven by the transport binding.
///
/// In production : an MQTT client adapter.
/// In tests and simulations : [`LocalBroker`] clients.
///
/// Inbound frames are handed over through the channel returned by
/// [`connect`](Broker::connect); it is the single inbound callback.
#[async_trait::async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Open the session. Returns the inbound frame stream.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        client_id: &str,
    ) -> Result<mpsc::Receiver<InboundFrame>, MailboxError>;

    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<(), MailboxError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<(), MailboxError>;

    async fn disconnect(&self, reason: DisconnectReason) -> Result<(), MailboxError>;
}

// ── LocalBroker (in-process hub) ────────────────────────────────────

/// An in-process broker: every [`LocalClient`] created from the same
/// `LocalBroker` shares one topic space.
///
/// Delivery is best effort for every class: a frame is dropped if the
/// receiving client's queue is full. Wills are not supported; a
/// disconnect only removes the session.
#[derive(Clone, Default)]
pub struct LocalBroker {
    hub: Arc<Mutex<Hub>>,
}

#[derive(Default)]
struct Hub {
    next_key: u64,
    sessions: HashMap<u64, Session>,
    retained: HashMap<String, Bytes>,
}

struct Session {
    client_id: String,
    tx: mpsc::Sender<InboundFrame>,
    subscriptions: Vec<Subscription>,
}

impl Session {
    /// Strongest matching subscription, if any.
    fn matching_qos(&self, topic: &str) -> Option<Qos> {
        self.subscriptions
            .iter()
            .filter(|s| topic_matches(&s.filter, topic))
            .map(|s| s.qos)
            .max_by_key(|qos| matches!(qos, Qos::AtLeastOnce))
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new, unconnected client handle.
    pub fn client(&self) -> LocalClient {
        let key = {
            let mut hub = self.lock();
            hub.next_key += 1;
            hub.next_key
        };
        LocalClient {
            hub: self.hub.clone(),
            key,
        }
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        lock(&self.hub)
    }
}

impl fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBroker")
            .field("sessions", &self.session_count())
            .finish()
    }
}

/// Lock a std mutex, recovering the data if a holder panicked.
///
/// Every critical section in this crate leaves its data consistent
/// between statements, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One client session on a [`LocalBroker`].
pub struct LocalClient {
    hub: Arc<Mutex<Hub>>,
    key: u64,
}

impl fmt::Debug for LocalClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalClient").field("key", &self.key).finish()
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        lock(&self.hub).sessions.remove(&self.key);
    }
}

#[async_trait::async_trait]
impl Broker for LocalClient {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        client_id: &str,
    ) -> Result<mpsc::Receiver<InboundFrame>, MailboxError> {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let mut hub = lock(&self.hub);
        hub.sessions.insert(
            self.key,
            Session {
                client_id: client_id.to_string(),
                tx,
                subscriptions: Vec::new(),
            },
        );
        tracing::debug!(%host, port, client_id, "local broker: session opened");
        Ok(rx)
    }

    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<(), MailboxError> {
        let mut hub = lock(&self.hub);
        let Hub {
            sessions, retained, ..
        } = &mut *hub;
        let session = sessions
            .get_mut(&self.key)
            .ok_or_else(|| MailboxError::Transport("subscribe before connect".into()))?;

        for subscription in subscriptions {
            for (topic, payload) in retained.iter() {
                if topic_matches(&subscription.filter, topic) {
                    let _ = session.tx.try_send(InboundFrame {
                        topic: topic.clone(),
                        payload: payload.clone(),
                        qos: subscription.qos,
                        retain: true,
                    });
                }
            }
            session.subscriptions.push(subscription.clone());
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        _qos: Qos,
        retain: bool,
    ) -> Result<(), MailboxError> {
        let mut hub = lock(&self.hub);
        if !hub.sessions.contains_key(&self.key) {
            return Err(MailboxError::Transport("publish before connect".into()));
        }

        if retain {
            if payload.is_empty() {
                hub.retained.remove(topic);
            } else {
                hub.retained.insert(topic.to_string(), payload.clone());
            }
        }

        let mut gone = vec![];
        for (&key, session) in &hub.sessions {
            let Some(qos) = session.matching_qos(topic) else {
                continue;
            };
            let frame = InboundFrame {
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
                retain: false,
            };
            match session.tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(client_id = %session.client_id, topic, "local broker: queue full, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(key),
            }
        }
        for key in gone {
            hub.sessions.remove(&key);
        }
        Ok(())
    }

    async fn disconnect(&self, reason: DisconnectReason) -> Result<(), MailboxError> {
        let removed = lock(&self.hub).sessions.remove(&self.key);
        if let Some(session) = removed {
            tracing::debug!(client_id = %session.client_id, ?reason, "local broker: session closed");
        }
        Ok(())
    }
}

// ── MockBroker (tests) ──────────────────────────────────────────────
