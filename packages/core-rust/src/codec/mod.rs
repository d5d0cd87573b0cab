//! Payload codecs and content-type negotiation.
//!
//! - [`JsonCodec`] - `application/json`, with integer normalization on decode
//! - [`MsgPackCodec`] - `application/msgpack` via `rmp-serde` (named fields)
//! - [`RawCodec`] - `application/octet-stream`, bytes pass through
//! - [`Codecs`] - content-type keyed set with a default, used for negotiation
//!
//! Codecs are stateless and shared across concurrent invocations behind
//! `Arc<dyn Codec>`; encode and decode never suspend.

mod json;
mod msgpack;
mod negotiate;
mod normalize;
mod raw;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::value::{Value, ValueError};

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
pub use negotiate::Codecs;
pub use normalize::{normalize_integers, normalize_integers_in_place};
pub use raw::RawCodec;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_MSGPACK: &str = "application/msgpack";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
/// Content type of flat-text error payloads.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Errors produced by codecs and negotiation.
///
/// The `Display` text never includes parser internals, so it is safe to hand
/// to untrusted callers. Use [`CodecError::detail`] for server-side logs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("malformed input")]
    Malformed { content_type: String, detail: String },
    #[error("could not encode value as {content_type}")]
    Encode { content_type: String, detail: String },
    #[error("unsupported content type {content_type:?}")]
    Unsupported { content_type: String },
    #[error("value does not have the expected shape")]
    Shape { detail: String },
}

impl CodecError {
    pub(crate) fn malformed(content_type: &str, detail: impl ToString) -> Self {
        Self::Malformed {
            content_type: content_type.to_string(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn encode(content_type: &str, detail: impl ToString) -> Self {
        Self::Encode {
            content_type: content_type.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Internal detail for logs. Not meant for external callers.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Malformed { detail, .. } | Self::Encode { detail, .. } | Self::Shape { detail } => {
                detail
            }
            Self::Unsupported { content_type } => content_type,
        }
    }
}

impl From<ValueError> for CodecError {
    fn from(e: ValueError) -> Self {
        Self::Shape {
            detail: e.to_string(),
        }
    }
}

/// Content-type tagged encode/decode strategy.
///
/// Implementations must be reentrant: one instance serves every concurrent
/// invocation.
pub trait Codec: Send + Sync + 'static {
    /// The content type this codec produces and accepts.
    fn content_type(&self) -> &str;

    /// Encodes a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the value cannot be represented.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    /// Decodes bytes to a value. An empty payload decodes to `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Malformed` for invalid input.
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;

    /// Whether the encoding can carry nested maps, used to pick between the
    /// structured and flat-text error encodings.
    fn supports_structured(&self) -> bool {
        true
    }
}

/// Typed helpers layered on any [`Codec`].
pub trait CodecExt: Codec {
    /// Encodes any serializable value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Shape` if the value cannot be converted, or the
    /// codec's encode error.
    fn encode_as<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let value = Value::from_serialize(value)?;
        self.encode(&value)
    }

    /// Decodes bytes into a typed target.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Malformed` for invalid bytes and
    /// `CodecError::Shape` when the decoded value does not fit `T`.
    fn decode_as<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(self.decode(bytes)?.deserialize_into()?)
    }
}

impl<C: Codec + ?Sized> CodecExt for C {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_display_hides_detail() {
        let err = CodecError::malformed(CONTENT_TYPE_JSON, "expected value at line 1 column 1");
        assert_eq!(err.to_string(), "malformed input");
        assert_eq!(err.detail(), "expected value at line 1 column 1");
    }

    #[test]
    fn typed_helpers_work_through_trait_objects() {
        #[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
        struct Order {
            id: i64,
            sku: String,
        }

        let codec: std::sync::Arc<dyn Codec> = std::sync::Arc::new(MsgPackCodec::new());
        let order = Order {
            id: 9,
            sku: "sku-1".to_string(),
        };
        let bytes = codec.encode_as(&order).unwrap();
        let back: Order = codec.decode_as(&bytes).unwrap();
        assert_eq!(back, order);

        let err = codec.decode_as::<Order>(&codec.encode(&Value::from("x")).unwrap());
        assert!(matches!(err, Err(CodecError::Shape { .. })));
    }
}
