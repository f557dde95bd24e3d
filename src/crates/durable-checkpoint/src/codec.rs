//! Codec abstraction for user payloads.
//!
//! The coordination core never inspects user payloads itself; it only ever moves opaque
//! strings in and out of `Operation::result`/`OperationUpdate::payload`. Everything that
//! needs to turn a user value into one of those strings (and back) goes through `Codec`.
//!
//! The trait itself only trades in `serde_json::Value` so that `Arc<dyn Codec>` stays a
//! legal trait object (a generic `serialize<T>` method on the trait would rule that out).
//! The ergonomic generic `serialize`/`deserialize` entry points are an inherent impl on
//! `dyn Codec`, going through `Value` as the intermediate representation.

use crate::error::Result;
use crate::operation::ErrorRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Serializes and deserializes user payloads and typed errors.
///
/// Implementations must round-trip: `decode_value(&encode_value(v)?)? == v` for every
/// representable `Value`. The default `JsonCodec` satisfies this trivially.
pub trait Codec: Send + Sync {
    /// Encode an already-`Value`-shaped payload to its durable string representation.
    fn encode_value(&self, value: Value) -> Result<String>;

    /// Decode a durable string representation back to its `Value` shape.
    fn decode_value(&self, data: &str) -> Result<Value>;
}

impl dyn Codec {
    /// Serialize a value to its durable string representation.
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<String> {
        self.encode_value(serde_json::to_value(value)?)
    }

    /// Deserialize a value from its durable string representation.
    pub fn deserialize<T: DeserializeOwned>(&self, data: &str) -> Result<T> {
        Ok(serde_json::from_value(self.decode_value(data)?)?)
    }

    /// Serialize an `ErrorRecord` for the `error` field of an `OperationUpdate`.
    pub fn serialize_error(&self, error: &ErrorRecord) -> Result<String> {
        self.serialize(error)
    }

    /// Reconstruct an `ErrorRecord` from a checkpointed `error` field.
    pub fn deserialize_error(&self, data: &str) -> Result<ErrorRecord> {
        self.deserialize(data)
    }
}

/// The default codec: plain JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn encode_value(&self, value: Value) -> Result<String> {
        Ok(serde_json::to_string(&value)?)
    }

    fn decode_value(&self, data: &str) -> Result<Value> {
        Ok(serde_json::from_str(data)?)
    }
}

/// A binary codec backed by `bincode`, hex-encoded to satisfy `Codec`'s string-in/string-out
/// contract. Smaller and faster to (de)serialize than JSON for payloads that are mostly
/// numeric/binary; timestamps and user-facing fields lose JSON's human-readability in
/// exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for BincodeCodec {
    fn encode_value(&self, value: Value) -> Result<String> {
        let bytes = bincode::serialize(&value)?;
        Ok(hex_encode(&bytes))
    }

    fn decode_value(&self, data: &str) -> Result<Value> {
        let bytes = hex_decode(data)?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn hex_decode(data: &str) -> Result<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(crate::error::CheckpointError::Custom(
            "hex-encoded payload has odd length".to_string(),
        ));
    }
    (0..data.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&data[i..i + 2], 16)
                .map_err(|e| crate::error::CheckpointError::Custom(format!("invalid hex payload: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Payload {
        name: String,
        count: i32,
    }

    #[test]
    fn json_codec_round_trips_user_payloads() {
        let codec: &dyn Codec = &JsonCodec::new();
        let value = Payload {
            name: "widget".to_string(),
            count: 3,
        };
        let encoded = codec.serialize(&value).unwrap();
        let decoded: Payload = codec.deserialize(&encoded).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn json_codec_round_trips_error_records() {
        let codec: &dyn Codec = &JsonCodec::new();
        let error = ErrorRecord::new("ValueError", "bad input")
            .with_stack_trace(vec!["Foo|bar|foo.rs|10".to_string()]);
        let encoded = codec.serialize_error(&error).unwrap();
        let decoded = codec.deserialize_error(&encoded).unwrap();
        assert_eq!(error, decoded);
    }

    #[test]
    fn deserialize_rejects_malformed_json() {
        let codec: &dyn Codec = &JsonCodec::new();
        let result: Result<Payload> = codec.deserialize("not json");
        assert!(result.is_err());
    }

    #[test]
    fn bincode_codec_round_trips_user_payloads() {
        let codec: &dyn Codec = &BincodeCodec::new();
        let value = Payload {
            name: "widget".to_string(),
            count: 3,
        };
        let encoded = codec.serialize(&value).unwrap();
        let decoded: Payload = codec.deserialize(&encoded).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn bincode_codec_round_trips_error_records() {
        let codec: &dyn Codec = &BincodeCodec::new();
        let error = ErrorRecord::new("ValueError", "bad input")
            .with_stack_trace(vec!["Foo|bar|foo.rs|10".to_string()]);
        let encoded = codec.serialize_error(&error).unwrap();
        let decoded = codec.deserialize_error(&encoded).unwrap();
        assert_eq!(error, decoded);
    }

    #[test]
    fn bincode_codec_rejects_odd_length_hex() {
        let codec: &dyn Codec = &BincodeCodec::new();
        let result: Result<Payload> = codec.deserialize("abc");
        assert!(result.is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Payload {
        name: String,
        count: i64,
        tags: Vec<String>,
    }

    proptest! {
        // §8 round-trip law: deserialize(serialize(x)) == x for representable values.
        #[test]
        fn json_codec_round_trips_arbitrary_payloads(
            name in ".*",
            count in any::<i64>(),
            tags in proptest::collection::vec(".*", 0..8),
        ) {
            let codec: &dyn Codec = &JsonCodec::new();
            let value = Payload { name, count, tags };
            let encoded = codec.serialize(&value).unwrap();
            let decoded: Payload = codec.deserialize(&encoded).unwrap();
            prop_assert_eq!(value, decoded);
        }

        #[test]
        fn error_record_round_trips_arbitrary_stack_traces(
            error_type in "[A-Za-z]{1,20}",
            message in ".*",
            frames in proptest::collection::vec("[A-Za-z0-9|./]{0,40}", 0..6),
        ) {
            let codec: &dyn Codec = &JsonCodec::new();
            let error = ErrorRecord::new(error_type, message).with_stack_trace(frames);
            let encoded = codec.serialize_error(&error).unwrap();
            let decoded = codec.deserialize_error(&encoded).unwrap();
            prop_assert_eq!(error, decoded);
        }
    }
}
