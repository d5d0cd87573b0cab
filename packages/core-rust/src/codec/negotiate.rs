use std::collections::HashMap;
use std::sync::Arc;

use super::{Codec, CodecError, JsonCodec, MsgPackCodec, RawCodec};

/// Codec set keyed by content type, with a fallback for requests that carry
/// none. Built at startup, then shared read-only.
#[derive(Clone)]
pub struct Codecs {
    by_type: HashMap<String, Arc<dyn Codec>>,
    default: Arc<dyn Codec>,
}

impl Codecs {
    /// Empty set whose default is `default` (also registered under its own
    /// content type).
    pub fn with_default(default: Arc<dyn Codec>) -> Self {
        let mut by_type = HashMap::new();
        by_type.insert(essence(default.content_type()), Arc::clone(&default));
        Self { by_type, default }
    }

    /// The reference codecs (`json`, `msgpack`, `raw`) with JSON as default.
    #[must_use]
    pub fn standard() -> Self {
        Self::with_default(Arc::new(JsonCodec))
            .register(Arc::new(MsgPackCodec))
            .register(Arc::new(RawCodec))
    }

    /// Adds (or replaces) the codec for its content type.
    #[must_use]
    pub fn register(mut self, codec: Arc<dyn Codec>) -> Self {
        let content_type = essence(codec.content_type());
        if self.by_type.insert(content_type.clone(), codec).is_some() {
            tracing::warn!(content_type = %content_type, "replacing registered codec");
        }
        self
    }

    /// Makes the codec registered for `content_type` the default.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Unsupported` if no codec is registered for it.
    pub fn set_default(&mut self, content_type: &str) -> Result<(), CodecError> {
        let codec = self.get(content_type)?;
        self.default = codec;
        Ok(())
    }

    /// Looks up the codec for a content type. Parameters such as
    /// `; charset=utf-8` and letter case are ignored.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Unsupported` for unknown content types.
    pub fn get(&self, content_type: &str) -> Result<Arc<dyn Codec>, CodecError> {
        self.by_type
            .get(&essence(content_type))
            .cloned()
            .ok_or_else(|| CodecError::Unsupported {
                content_type: content_type.to_string(),
            })
    }

    /// Picks the codec for a request: its content type if present and
    /// non-empty, otherwise the default.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Unsupported` for unknown content types.
    pub fn negotiate(&self, content_type: Option<&str>) -> Result<Arc<dyn Codec>, CodecError> {
        match content_type.map(str::trim) {
            Some(ct) if !ct.is_empty() => self.get(ct),
            _ => Ok(self.default_codec()),
        }
    }

    #[must_use]
    pub fn default_codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.default)
    }

    pub fn content_types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }
}

impl Default for Codecs {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for Codecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.content_types().collect();
        types.sort_unstable();
        f.debug_struct("Codecs")
            .field("content_types", &types)
            .field("default", &self.default.content_type())
            .finish()
    }
}

/// Media type without parameters, lowercased.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
