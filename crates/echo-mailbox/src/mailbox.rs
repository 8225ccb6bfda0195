//! Mailbox: the contract consumed by the round-based computation engine,
//! and its broker-backed implementation.
//!
//! `BrokerMailbox` owns the shared tables and three supervised background
//! tasks (heartbeat, sweep, receive). Both tables sit behind their own
//! mutex; no lock is ever held across an `.await`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::binding::{Inbound, TransportBinding};
use crate::broker::{lock, Broker, InboundFrame};
use crate::buffer::MessageBuffer;
use crate::codec::Codec;
use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::message::{Message, MessageFactory, OutboundEnvelope};
use crate::neighbors::NeighborTable;
use crate::topics::TopicScheme;
use crate::types::{now_ms, DeviceId, Path};

/// Shortest cadence accepted for background timers.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Pause before a panicked background task is started again.
const RESTART_DELAY: Duration = Duration::from_millis(100);

// ── Engine contract ───────────────────────────────────────────────────

/// How the engine expects a value to travel between devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSharingMethod {
    /// Through the codec, as bytes.
    Serialize,
    /// As a live in-process value, never serialized.
    InMemory,
}

/// The neighbors' data for the current round.
pub trait NeighborsData {
    /// Devices with a live message.
    fn neighbors(&self) -> BTreeSet<DeviceId>;

    /// The decoded value at `path` for every live neighbor that shared one.
    fn data_at<V: DeserializeOwned>(
        &self,
        path: &Path,
        method: DataSharingMethod,
    ) -> Result<HashMap<DeviceId, V>, MailboxError>;
}

/// Inbound/outbound contract between the engine and the network.
#[async_trait::async_trait]
pub trait Mailbox: Send + Sync {
    type Inbound: NeighborsData;

    /// Whether data stays in memory. A serializing mailbox returns `false`.
    fn in_memory(&self) -> bool;

    /// Send this round's data to every current neighbor. Returns the number
    /// of messages sent.
    async fn deliverable_for<E>(&self, envelope: &E) -> Result<usize, MailboxError>
    where
        E: OutboundEnvelope + Sync;

    /// Store a message received from a neighbor.
    fn deliverable_received(&self, message: Message) -> Result<(), MailboxError>;

    /// The inbound view for the round being computed.
    fn current_inbound(&self) -> Self::Inbound;
}

// ── Lifecycle ─────────────────────────────────────────────────────────

/// Lifecycle of a [`BrokerMailbox`]. No transition leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxState {
    Created,
    Initializing,
    Running,
    Closing,
    Closed,
}

impl fmt::Display for MailboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MailboxState::Created => "created",
            MailboxState::Initializing => "initializing",
            MailboxState::Running => "running",
            MailboxState::Closing => "closing",
            MailboxState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ── Shared state ──────────────────────────────────────────────────────

/// State touched by the engine and by every background task.
struct Shared {
    device_id: DeviceId,
    retention: Duration,
    codec: Codec,
    neighbors: Mutex<NeighborTable>,
    buffer: Mutex<MessageBuffer>,
    observers: broadcast::Sender<Message>,
    state: Mutex<MailboxState>,
}

impl Shared {
    fn state(&self) -> MailboxState {
        *lock(&self.state)
    }

    fn set_state(&self, next: MailboxState) {
        let mut state = lock(&self.state);
        let from = *state;
        if from != MailboxState::Closed {
            tracing::debug!(device = %self.device_id, %from, to = %next, "mailbox state");
            *state = next;
        }
    }

    fn ensure_running(&self) -> Result<(), MailboxError> {
        match self.state() {
            MailboxState::Closing | MailboxState::Closed => Err(MailboxError::Closed),
            _ => Ok(()),
        }
    }

    /// Record an observation of another device.
    fn observe(&self, device_id: DeviceId) {
        if device_id != self.device_id {
            lock(&self.neighbors).touch(device_id);
        }
    }

    fn store(&self, message: Message) {
        let sender = message.sender_id;
        self.observe(sender);
        lock(&self.buffer).put(sender, message.clone(), now_ms());
        // No observers is fine.
        let _ = self.observers.send(message);
    }

    fn live_neighbors(&self, now: u64) -> BTreeSet<DeviceId> {
        let mut neighbors = lock(&self.neighbors).neighbors_within(self.retention, now);
        neighbors.remove(&self.device_id);
        neighbors
    }

    fn sweep(&self, now: u64) {
        let departed = lock(&self.neighbors).sweep_at(self.retention, now);
        let expired = lock(&self.buffer).sweep_at(self.retention, now);
        if !departed.is_empty() || !expired.is_empty() {
            tracing::debug!(
                departed = departed.len(),
                expired = expired.len(),
                "retention sweep"
            );
        }
    }
}

// ── InboundView ───────────────────────────────────────────────────────

/// Live view over the message buffer.
///
/// Every evaluation evicts entries older than the retention window first,
/// so a view kept across rounds never exposes stale data.
#[derive(Clone)]
pub struct InboundView {
    shared: Arc<Shared>,
}

impl fmt::Debug for InboundView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundView")
            .field("device_id", &self.shared.device_id)
            .finish()
    }
}

impl NeighborsData for InboundView {
    fn neighbors(&self) -> BTreeSet<DeviceId> {
        lock(&self.shared.buffer).current_view(self.shared.retention, now_ms())
    }

    fn data_at<V: DeserializeOwned>(
        &self,
        path: &Path,
        method: DataSharingMethod,
    ) -> Result<HashMap<DeviceId, V>, MailboxError> {
        if method != DataSharingMethod::Serialize {
            return Err(MailboxError::SerializationMismatch);
        }
        let codec = self.shared.codec;
        let now = now_ms();
        let mut buffer = lock(&self.shared.buffer);
        buffer.sweep_at(self.shared.retention, now);
        buffer.data_at(path, self.shared.retention, now, |bytes| codec.decode(bytes))
    }
}

// ── BrokerMailbox ─────────────────────────────────────────────────────

/// A mailbox exchanging serialized envelopes over a publish/subscribe broker.
pub struct BrokerMailbox<B: Broker> {
    shared: Arc<Shared>,
    binding: Arc<TransportBinding<B>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<B: Broker> BrokerMailbox<B> {
    /// Connect to the broker, subscribe, and start the background tasks.
    ///
    /// On failure the mailbox never reaches `Running` and the error from
    /// the broker is returned as is.
    pub async fn connect(config: MailboxConfig, broker: B) -> Result<Self, MailboxError> {
        let codec = Codec::new(config.format);
        let (observers, _) = broadcast::channel(config.observer_buffer.max(1));
        let shared = Arc::new(Shared {
            device_id: config.device_id,
            retention: config.retention,
            codec,
            neighbors: Mutex::new(NeighborTable::new()),
            buffer: Mutex::new(MessageBuffer::new()),
            observers,
            state: Mutex::new(MailboxState::Created),
        });
        let binding = Arc::new(TransportBinding::new(
            broker,
            config.device_id,
            codec,
            TopicScheme::new(config.namespace.clone()),
        ));

        shared.set_state(MailboxState::Initializing);
        let frames = match binding.start(&config.host, config.port).await {
            Ok(frames) => frames,
            Err(e) => {
                shared.set_state(MailboxState::Closed);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let tasks = vec![
            supervise("heartbeat", cancel.clone(), {
                let binding = binding.clone();
                let cancel = cancel.clone();
                let every = config.heartbeat_interval.max(MIN_TICK);
                move || heartbeat_loop(binding.clone(), every, cancel.clone())
            }),
            supervise("sweep", cancel.clone(), {
                let shared = shared.clone();
                let cancel = cancel.clone();
                let every = config.effective_sweep_interval().max(MIN_TICK);
                move || sweep_loop(shared.clone(), every, cancel.clone())
            }),
            supervise("receive", cancel.clone(), {
                let shared = shared.clone();
                let binding = binding.clone();
                let cancel = cancel.clone();
                let frames = Arc::new(tokio::sync::Mutex::new(frames));
                move || receive_loop(shared.clone(), binding.clone(), frames.clone(), cancel.clone())
            }),
        ];

        shared.set_state(MailboxState::Running);
        tracing::info!(device = %config.device_id, format = %config.format, "mailbox running");

        Ok(Self {
            shared,
            binding,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn device_id(&self) -> DeviceId {
        self.shared.device_id
    }

    pub fn state(&self) -> MailboxState {
        self.shared.state()
    }

    /// Devices heard from within the retention window, excluding this one.
    pub fn neighbors(&self) -> BTreeSet<DeviceId> {
        self.shared.live_neighbors(now_ms())
    }

    /// Observe every message stored by the mailbox.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.shared.observers.subscribe()
    }

    /// Stop the background tasks and leave the broker.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn close(&self) {
        if !self.begin_close() {
            return;
        }
        self.cancel.cancel();
        for task in self.take_tasks() {
            let _ = task.await;
        }
        self.binding.shutdown().await;
        self.shared.set_state(MailboxState::Closed);
        tracing::info!(device = %self.shared.device_id, "disconnected from the broker");
    }

    /// Move to `Closing`. Returns `false` if a close already started.
    fn begin_close(&self) -> bool {
        let mut state = lock(&self.shared.state);
        match *state {
            MailboxState::Closing | MailboxState::Closed => false,
            _ => {
                *state = MailboxState::Closing;
                true
            }
        }
    }

    fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *lock(&self.tasks))
    }
}

#[async_trait::async_trait]
impl<B: Broker> Mailbox for BrokerMailbox<B> {
    type Inbound = InboundView;

    fn in_memory(&self) -> bool {
        false
    }

    async fn deliverable_for<E>(&self, envelope: &E) -> Result<usize, MailboxError>
    where
        E: OutboundEnvelope + Sync,
    {
        self.shared.ensure_running()?;
        let neighbors = self.shared.live_neighbors(now_ms());
        let factory = MessageFactory::new(self.shared.device_id, &self.shared.codec);

        let mut sent = 0;
        for neighbor in neighbors {
            let message = envelope.message_for(neighbor, &factory)?;
            self.binding.send(neighbor, &message).await?;
            sent += 1;
        }
        Ok(sent)
    }

    fn deliverable_received(&self, message: Message) -> Result<(), MailboxError> {
        self.shared.ensure_running()?;
        self.shared.store(message);
        Ok(())
    }

    fn current_inbound(&self) -> InboundView {
        lock(&self.shared.buffer).sweep_at(self.shared.retention, now_ms());
        InboundView {
            shared: self.shared.clone(),
        }
    }
}

impl<B: Broker> Drop for BrokerMailbox<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background tasks ──────────────────────────────────────────────────

/// Run `task` until it returns, restarting it if it panics before
/// cancellation.
fn supervise<F, Fut>(name: &'static str, cancel: CancellationToken, task: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match tokio::spawn(task()).await {
                Ok(()) => break,
                Err(e) if e.is_panic() && !cancel.is_cancelled() => {
                    tracing::error!(task = name, "background task panicked, restarting");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RESTART_DELAY) => {}
                    }
                }
                Err(_) => break,
            }
        }
    })
}

async fn heartbeat_loop<B: Broker>(
    binding: Arc<TransportBinding<B>>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // A publish the broker never completes must not hold up close.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = binding.publish_heartbeat() => {
                        if let Err(e) = result {
                            tracing::warn!("heartbeat publish failed: {e}");
                        }
                    }
                }
            }
        }
    }
}

async fn sweep_loop(shared: Arc<Shared>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => shared.sweep(now_ms()),
        }
    }
}

async fn receive_loop<B: Broker>(
    shared: Arc<Shared>,
    binding: Arc<TransportBinding<B>>,
    frames: Arc<tokio::sync::Mutex<mpsc::Receiver<InboundFrame>>>,
    cancel: CancellationToken,
) {
    let mut frames = frames.lock().await;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else {
            tracing::info!(device = %shared.device_id, "inbound stream closed");
            break;
        };
        match binding.route(&frame) {
            Some(Inbound::Heartbeat(device_id)) => shared.observe(device_id),
            Some(Inbound::Message(message)) => shared.store(message.into()),
            None => {}
        }
    }
}
