//! Serialization dispatch over the two wire-format families.
//!
//! Text (JSON): the value is rendered as a string, then taken as UTF-8 bytes.
//! Binary (MessagePack): the value is written to bytes directly.
//!
//! The family is chosen once, when the codec is built.
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::MailboxError;
use crate::message::SerializedMessage;

/// Wire-format family used by a [`Codec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormatFamily {
    /// JSON text.
    #[default]
    Text,
    /// MessagePack.
    Binary,
}

impl fmt::Display for FormatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatFamily::Text => f.write_str("json"),
            FormatFamily::Binary => f.write_str("msgpack"),
        }
    }
}

impl FromStr for FormatFamily {
    type Err = MailboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" | "text" => Ok(FormatFamily::Text),
            "msgpack" | "messagepack" | "binary" => Ok(FormatFamily::Binary),
            other => Err(MailboxError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Encodes values and whole envelopes for one format family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    family: FormatFamily,
}

impl Codec {
    pub fn new(family: FormatFamily) -> Self {
        Self { family }
    }

    pub fn json() -> Self {
        Self::new(FormatFamily::Text)
    }

    pub fn msgpack() -> Self {
        Self::new(FormatFamily::Binary)
    }

    pub fn family(&self) -> FormatFamily {
        self.family
    }

    /// Encode a value to bytes.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, MailboxError> {
        match self.family {
            FormatFamily::Text => serde_json::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| MailboxError::Serialization(e.to_string())),
            // Named encoding keeps struct fields as map keys, matching the text form.
            FormatFamily::Binary => rmp_serde::to_vec_named(value).map_err(Into::into),
        }
    }

    /// Decode a value from bytes.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, MailboxError> {
        match self.family {
            FormatFamily::Text => {
                let text = std::str::from_utf8(bytes)?;
                serde_json::from_str(text).map_err(|e| MailboxError::Deserialization(e.to_string()))
            }
            FormatFamily::Binary => rmp_serde::from_slice(bytes).map_err(Into::into),
        }
    }

    /// Encode a whole wire envelope.
    pub fn encode_envelope(&self, message: &SerializedMessage) -> Result<Vec<u8>, MailboxError> {
        self.encode(message)
    }

    /// Decode a whole wire envelope.
    pub fn decode_envelope(&self, bytes: &[u8]) -> Result<SerializedMessage, MailboxError> {
        self.decode(bytes)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::json()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::types::{DeviceId, Path};

    fn devices() -> BTreeSet<DeviceId> {
        (1..=3).map(DeviceId::from_u128).collect()
    }

    fn envelope() -> SerializedMessage {
        let mut shared_data = BTreeMap::new();
        shared_data.insert(Path::new("count"), vec![0x33]);
        shared_data.insert(Path::new("neighbors"), vec![1, 2, 3, 255]);
        SerializedMessage {
            sender_id: DeviceId::from_u128(42),
            shared_data,
        }
    }

    #[test]
    fn parse_format_names() {
        assert_eq!("json".parse::<FormatFamily>().unwrap(), FormatFamily::Text);
        assert_eq!("TEXT".parse::<FormatFamily>().unwrap(), FormatFamily::Text);
        assert_eq!("msgpack".parse::<FormatFamily>().unwrap(), FormatFamily::Binary);
        assert_eq!("binary".parse::<FormatFamily>().unwrap(), FormatFamily::Binary);
    }

    #[test]
    fn unknown_format_is_unsupported() {
        let err = "cbor".parse::<FormatFamily>().unwrap_err();
        assert!(matches!(err, MailboxError::UnsupportedFormat(ref f) if f == "cbor"));
    }

    #[test]
    fn text_family_produces_utf8_json() {
        let bytes = Codec::json().encode(&3u32).unwrap();
        assert_eq!(bytes, b"3");
    }

    #[test]
    fn device_set_roundtrip_both_families() {
        for codec in [Codec::json(), Codec::msgpack()] {
            let bytes = codec.encode(&devices()).unwrap();
            let decoded: BTreeSet<DeviceId> = codec.decode(&bytes).unwrap();
            assert_eq!(decoded, devices(), "value roundtrip failed for {}", codec.family());

            // Canonical bytes survive decode-then-encode.
            let again = codec.encode(&decoded).unwrap();
            assert_eq!(again, bytes, "byte roundtrip failed for {}", codec.family());
        }
    }

    #[test]
    fn envelope_roundtrip_both_families() {
        for codec in [Codec::json(), Codec::msgpack()] {
            let bytes = codec.encode_envelope(&envelope()).unwrap();
            let decoded = codec.decode_envelope(&bytes).unwrap();
            assert_eq!(decoded, envelope());
        }
    }

    #[test]
    fn json_envelope_rejected_by_binary_codec() {
        let bytes = Codec::json().encode_envelope(&envelope()).unwrap();
        let err = Codec::msgpack().decode_envelope(&bytes).unwrap_err();
        assert!(matches!(err, MailboxError::Deserialization(_)), "got {err:?}");
    }

    #[test]
    fn binary_envelope_rejected_by_text_codec() {
        let bytes = Codec::msgpack().encode_envelope(&envelope()).unwrap();
        let err = Codec::json().decode_envelope(&bytes).unwrap_err();
        assert!(matches!(err, MailboxError::Deserialization(_)), "got {err:?}");
    }

    #[test]
    fn binary_device_set_rejected_by_text_codec() {
        let bytes = Codec::msgpack().encode(&devices()).unwrap();
        let err = Codec::json().decode::<BTreeSet<DeviceId>>(&bytes).unwrap_err();
        assert!(matches!(err, MailboxError::Deserialization(_)));
    }
}
