//! Topic scheme: namespace-qualified publish/subscribe addresses.
//!
//! - `<ns>/heartbeat/<id>`: empty heartbeat frames
//! - `<ns>/heartbeat/+`: subscription covering every heartbeat
//! - `<ns>/device/<id>`: serialized envelopes addressed to one device

use crate::types::DeviceId;

/// Default application namespace.
pub const DEFAULT_NAMESPACE: &str = "Echo";

const HEARTBEAT_SEGMENT: &str = "heartbeat";
const DEVICE_SEGMENT: &str = "device";

/// What an inbound topic refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicClass<'a> {
    /// A heartbeat; carries the raw topic suffix (the sender id).
    Heartbeat(&'a str),
    /// A device payload topic; carries the raw suffix (the recipient id).
    Device(&'a str),
}

/// Derives every topic for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    namespace: String,
}

impl TopicScheme {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn heartbeat_prefix(&self) -> String {
        format!("{}/{HEARTBEAT_SEGMENT}", self.namespace)
    }

    pub fn heartbeat_wildcard(&self) -> String {
        format!("{}/+", self.heartbeat_prefix())
    }

    pub fn heartbeat_topic(&self, device_id: &DeviceId) -> String {
        format!("{}/{device_id}", self.heartbeat_prefix())
    }

    pub fn device_topic(&self, device_id: &DeviceId) -> String {
        format!("{}/{DEVICE_SEGMENT}/{device_id}", self.namespace)
    }

    /// Classify a concrete topic of this namespace.
    ///
    /// Returns `None` for topics outside the namespace or with an
    /// unexpected shape.
    pub fn classify<'t>(&self, topic: &'t str) -> Option<TopicClass<'t>> {
        let rest = topic.strip_prefix(self.namespace.as_str())?.strip_prefix('/')?;
        let (segment, suffix) = rest.split_once('/')?;
        if suffix.is_empty() || suffix.contains('/') {
            return None;
        }
        match segment {
            HEARTBEAT_SEGMENT => Some(TopicClass::Heartbeat(suffix)),
            DEVICE_SEGMENT => Some(TopicClass::Device(suffix)),
            _ => None,
        }
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

/// MQTT-style filter matching: `+` matches one level, a trailing `#`
/// matches the rest (including the parent level itself).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(n: u128) -> DeviceId {
        DeviceId::from_u128(n)
    }

    #[test]
    fn topics_are_namespace_qualified() {
        let scheme = TopicScheme::default();
        let id = device(1);
        assert_eq!(scheme.heartbeat_wildcard(), "Echo/heartbeat/+");
        assert_eq!(
            scheme.heartbeat_topic(&id),
            "Echo/heartbeat/00000000-0000-0000-0000-000000000001"
        );
        assert_eq!(
            scheme.device_topic(&id),
            "Echo/device/00000000-0000-0000-0000-000000000001"
        );
    }

    #[test]
    fn classify_known_topics() {
        let scheme = TopicScheme::new("ns");
        assert_eq!(scheme.classify("ns/heartbeat/abc"), Some(TopicClass::Heartbeat("abc")));
        assert_eq!(scheme.classify("ns/device/abc"), Some(TopicClass::Device("abc")));
    }

    #[test]
    fn classify_rejects_foreign_topics() {
        let scheme = TopicScheme::new("ns");
        assert_eq!(scheme.classify("other/heartbeat/abc"), None);
        assert_eq!(scheme.classify("nsx/heartbeat/abc"), None);
        assert_eq!(scheme.classify("ns/heartbeat/"), None);
        assert_eq!(scheme.classify("ns/heartbeat/a/b"), None);
        assert_eq!(scheme.classify("ns/chat/abc"), None);
    }

    #[test]
    fn heartbeat_wildcard_matches_single_level() {
        let scheme = TopicScheme::default();
        let filter = scheme.heartbeat_wildcard();
        assert!(topic_matches(&filter, &scheme.heartbeat_topic(&device(3))));
        assert!(!topic_matches(&filter, &scheme.device_topic(&device(3))));
        assert!(!topic_matches(&filter, "Echo/heartbeat/a/b"));
        assert!(!topic_matches(&filter, "Echo/heartbeat"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("Echo/#", "Echo/device/x"));
        assert!(topic_matches("Echo/#", "Echo"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("Echo/#", "Other/device/x"));
    }

    #[test]
    fn exact_match() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }
}
