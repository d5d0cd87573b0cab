use super::{normalize_integers, Codec, CodecError, CONTENT_TYPE_JSON};
use crate::value::Value;

/// `application/json` codec.
///
/// Decoded values are passed through [`normalize_integers`] so that numbers
/// written as `1234.0` reach handlers as integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn content_type(&self) -> &str {
        CONTENT_TYPE_JSON
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::encode(CONTENT_TYPE_JSON, e))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::malformed(CONTENT_TYPE_JSON, e))?;
        Ok(normalize_integers(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecExt;

    #[test]
    fn decode_normalizes_integral_floats() {
        let v = JsonCodec.decode(br#"{"id": 1234.0, "ratio": 0.5}"#).unwrap();
        assert_eq!(v.get("id"), Some(&Value::Int(1234)));
        assert_eq!(v.get("ratio"), Some(&Value::Float(0.5)));
    }

    #[test]
    fn empty_payload_is_null() {
        assert_eq!(JsonCodec.decode(b"").unwrap(), Value::Null);
        assert_eq!(JsonCodec.decode(b"  \n").unwrap(), Value::Null);
    }

    #[test]
    fn malformed_input_is_generic() {
        let err = JsonCodec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
        assert_eq!(err.to_string(), "malformed input");
        assert!(!err.detail().is_empty());
    }

    #[test]
    fn typed_round_trip() {
        #[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
        struct Customer {
            id: u64,
            name: String,
            tags: Vec<String>,
        }

        let c = Customer {
            id: 7,
            name: "Ada".to_string(),
            tags: vec!["vip".to_string()],
        };
        let bytes = JsonCodec.encode_as(&c).unwrap();
        assert_eq!(JsonCodec.decode_as::<Customer>(&bytes).unwrap(), c);
    }
}
