use super::{Codec, CodecError, CONTENT_TYPE_OCTET_STREAM};
use crate::value::Value;

/// `application/octet-stream` codec: payload bytes pass through untouched.
///
/// Only `Value::Bytes`, `Value::String` and `Value::Null` encode; anything
/// structured is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl RawCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Codec for RawCodec {
    fn content_type(&self) -> &str {
        CONTENT_TYPE_OCTET_STREAM
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Null => Ok(Vec::new()),
            other => Err(CodecError::encode(
                CONTENT_TYPE_OCTET_STREAM,
                format!("cannot write {other} as raw bytes"),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(Value::Bytes(bytes.to_vec()))
    }

    fn supports_structured(&self) -> bool {
        false
    }
}
