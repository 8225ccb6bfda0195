use std::time::Duration;

use crate::codec::FormatFamily;
use crate::topics::DEFAULT_NAMESPACE;
use crate::types::DeviceId;

/// Configuration for a [`BrokerMailbox`](crate::BrokerMailbox).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use echo_mailbox::{FormatFamily, MailboxConfig};
///
/// let config = MailboxConfig::new()
///     .host("broker.example.org")
///     .format(FormatFamily::Binary)
///     .retention(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    /// This device's identity.
    pub(crate) device_id: DeviceId,
    /// Broker host name.
    pub(crate) host: String,
    /// Broker port.
    pub(crate) port: u16,
    /// Topic namespace shared by every participant.
    pub(crate) namespace: String,
    /// Wire-format family for values and envelopes.
    pub(crate) format: FormatFamily,
    /// Maximum age of a neighbor or buffered message.
    pub(crate) retention: Duration,
    /// Cadence of heartbeat emission.
    pub(crate) heartbeat_interval: Duration,
    /// Cadence of retention sweeps. Defaults to the retention window.
    pub(crate) sweep_interval: Option<Duration>,
    /// Capacity of the inbound message observer channel.
    pub(crate) observer_buffer: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxConfig {
    /// Create a new config with defaults and a random device id.
    ///
    /// If the `ECHO_BROKER_HOST` environment variable is set, it is used as
    /// the broker host. This can be overridden with [`.host()`](Self::host).
    pub fn new() -> Self {
        let host = std::env::var("ECHO_BROKER_HOST").unwrap_or_else(|_| "localhost".to_string());

        Self {
            device_id: DeviceId::random(),
            host,
            port: 1883,
            namespace: DEFAULT_NAMESPACE.to_string(),
            format: FormatFamily::Text,
            retention: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            sweep_interval: None,
            observer_buffer: 64,
        }
    }

    pub fn device_id(mut self, device_id: DeviceId) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the broker port (default: 1883).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the topic namespace (default: `Echo`).
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the wire-format family (default: text).
    pub fn format(mut self, format: FormatFamily) -> Self {
        self.format = format;
        self
    }

    /// Set the retention window (default: 5 s).
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the heartbeat cadence (default: 1 s).
    ///
    /// Independent of the retention window: nothing guarantees that a
    /// heartbeat lands before a record expires.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the sweep cadence (default: the retention window).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn observer_buffer(mut self, capacity: usize) -> Self {
        self.observer_buffer = capacity;
        self
    }

    pub fn get_device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Effective sweep cadence.
    pub fn effective_sweep_interval(&self) -> Duration {
        self.sweep_interval.unwrap_or(self.retention)
    }
}
