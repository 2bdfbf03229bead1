//! # Serialization Formats
//!
//! Abstraction over the self-describing formats a frame body can use.
//! Supports MessagePack (default) and JSON (debugging/interop).
//!
//! ## Message Model
//! Outbound values are any `Serialize` type. They are first lowered to a
//! [`Message`] tree, so anything that cannot be expressed as a tree of
//! scalars, sequences and string-keyed mappings is rejected at the call site
//! instead of producing a frame the peer cannot decode. Inbound bodies
//! always decode to a [`Message`].
//!
//! ## Usage
//! ```rust
//! use serde_json::json;
//! use torpedo_msg::core::serialization::{Codec, SerializationFormat};
//!
//! let codec = Codec::new(SerializationFormat::MessagePack);
//! let body = codec.encode(&json!({"cmd": "snapshot"})).unwrap();
//! assert_eq!(codec.decode(&body).unwrap(), json!({"cmd": "snapshot"}));
//! ```

use crate::error::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A schema-less message: null, bool, number, string, array or object.
pub type Message = serde_json::Value;

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// Compact binary format (default)
    #[default]
    #[serde(rename = "msgpack")]
    MessagePack,
    /// Human-readable JSON format (debugging, interop)
    Json,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::MessagePack => "MessagePack",
            SerializationFormat::Json => "JSON",
        }
    }
}

impl fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SerializationFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msgpack" | "messagepack" => Ok(SerializationFormat::MessagePack),
            "json" => Ok(SerializationFormat::Json),
            other => Err(format!("Unknown serialization format: {other}")),
        }
    }
}

/// Turns values into frame bodies and frame bodies into [`Message`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Codec {
    format: SerializationFormat,
}

impl Codec {
    pub fn new(format: SerializationFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Serialize `msg` into a frame body.
    ///
    /// # Errors
    /// `ProtocolError::SerializeError` if the value is not representable as a
    /// [`Message`] tree or the serializer rejects it.
    pub fn encode<T>(&self, msg: &T) -> Result<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        let tree = serde_json::to_value(msg)
            .map_err(|e| ProtocolError::SerializeError(e.to_string()))?;

        match self.format {
            SerializationFormat::MessagePack => rmp_serde::to_vec_named(&tree)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
            SerializationFormat::Json => serde_json::to_vec(&tree)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
        }
    }

    /// Deserialize a frame body into a [`Message`].
    ///
    /// # Errors
    /// `ProtocolError::DeserializeError` on malformed input.
    pub fn decode(&self, body: &[u8]) -> Result<Message> {
        self.decode_as(body)
    }

    /// Deserialize a frame body straight into a typed value.
    pub fn decode_as<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T> {
        match self.format {
            SerializationFormat::MessagePack => rmp_serde::from_slice(body)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(body)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    struct Unrepresentable;

    impl Serialize for Unrepresentable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(S::Error::custom("refused"))
        }
    }

    #[test]
    fn test_default_format() {
        assert_eq!(SerializationFormat::default(), SerializationFormat::MessagePack);
        assert_eq!(Codec::default().format(), SerializationFormat::MessagePack);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("json".parse(), Ok(SerializationFormat::Json));
        assert_eq!("MsgPack".parse(), Ok(SerializationFormat::MessagePack));
        assert!("cbor".parse::<SerializationFormat>().is_err());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_nested_tree_roundtrip_both_formats() {
        let msg = json!({
            "cmd": "snapshot",
            "data": [0, 1, -2, 3.5, null, true, "x"],
            "nested": {"a": {"b": []}, "c": {}},
        });
        for format in [SerializationFormat::MessagePack, SerializationFormat::Json] {
            let codec = Codec::new(format);
            let body = codec.encode(&msg).expect("encode");
            assert_eq!(codec.decode(&body).expect("decode"), msg, "{format}");
        }
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_struct_fields_are_named_on_the_wire() {
        #[derive(Serialize)]
        struct Snapshot {
            cmd: &'static str,
            data: Vec<u32>,
        }

        let codec = Codec::default();
        let body = codec
            .encode(&Snapshot {
                cmd: "snapshot",
                data: vec![1, 2],
            })
            .expect("encode");
        assert_eq!(
            codec.decode(&body).expect("decode"),
            json!({"cmd": "snapshot", "data": [1, 2]})
        );
    }

    #[test]
    fn test_encode_error_surfaces() {
        for format in [SerializationFormat::MessagePack, SerializationFormat::Json] {
            let result = Codec::new(format).encode(&Unrepresentable);
            assert!(matches!(result, Err(ProtocolError::SerializeError(_))));
        }
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        // 0xc1 is the one byte MessagePack never uses
        let result = Codec::default().decode(&[0xc1]);
        assert!(matches!(result, Err(ProtocolError::DeserializeError(_))));

        let result = Codec::new(SerializationFormat::Json).decode(b"{\"cmd\":");
        assert!(matches!(result, Err(ProtocolError::DeserializeError(_))));
    }

    #[test]
    fn test_empty_body_is_decode_error() {
        assert!(Codec::default().decode(&[]).is_err());
    }
}
