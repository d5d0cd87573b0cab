use super::{Codec, CodecError, CONTENT_TYPE_MSGPACK};
use crate::value::Value;

/// `application/msgpack` codec.
///
/// Structs are written as maps with field names (`rmp_serde::to_vec_named`)
/// so payloads stay readable by non-Rust peers. Non-string map keys are
/// stringified on decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Codec for MsgPackCodec {
    fn content_type(&self) -> &str {
        CONTENT_TYPE_MSGPACK
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::encode(CONTENT_TYPE_MSGPACK, e))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::malformed(CONTENT_TYPE_MSGPACK, e))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn preserves_bytes_and_integers() {
        let mut m = BTreeMap::new();
        m.insert("blob".to_string(), Value::Bytes(vec![0, 1, 255]));
        m.insert("n".to_string(), Value::Int(-42));
        m.insert("f".to_string(), Value::Float(2.0));
        let v = Value::Map(m);

        let bytes = MsgPackCodec.encode(&v).unwrap();
        let back = MsgPackCodec.decode(&bytes).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn truncated_input_is_malformed() {
        let bytes = MsgPackCodec.encode(&Value::from("hello world")).unwrap();
        let err = MsgPackCodec.decode(&bytes[..3]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }
}
