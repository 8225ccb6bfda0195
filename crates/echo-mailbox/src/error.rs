use crate::types::DeviceId;

/// Mailbox-level errors for Echo.
///
/// Covers codec failures, misuse of the engine contract and
/// transport failures reported by the broker capability.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("serialization has been required for in-memory messages, this is likely a misconfiguration")]
    SerializationMismatch,

    #[error("message from {sender} is not serialized")]
    MalformedMessage { sender: DeviceId },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("mailbox is closed")]
    Closed,
}

impl From<rmp_serde::encode::Error> for MailboxError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        MailboxError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MailboxError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        MailboxError::Deserialization(e.to_string())
    }
}

impl From<std::str::Utf8Error> for MailboxError {
    fn from(e: std::str::Utf8Error) -> Self {
        MailboxError::Deserialization(format!("payload is not valid UTF-8 text: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unsupported_format() {
        let err = MailboxError::UnsupportedFormat("cbor".into());
        assert_eq!(err.to_string(), "unsupported format: cbor");
    }

    #[test]
    fn test_display_malformed_message() {
        let err = MailboxError::MalformedMessage {
            sender: DeviceId::from_u128(1),
        };
        assert_eq!(
            err.to_string(),
            "message from 00000000-0000-0000-0000-000000000001 is not serialized"
        );
    }

    #[test]
    fn test_display_closed() {
        assert_eq!(MailboxError::Closed.to_string(), "mailbox is closed");
    }

    #[test]
    fn test_display_transport() {
        let err = MailboxError::Transport("not connected".into());
        assert_eq!(err.to_string(), "transport error: not connected");
    }
}
