use std::collections::BTreeMap;

use bytes::Bytes;

/// Pseudo-header carrying the invocation address on a request.
pub const PATH: &str = ":path";
/// Pseudo-header carrying the reply status (`"200"` / `"500"`).
pub const STATUS: &str = ":status";
pub const CONTENT_TYPE: &str = "content-type";

pub const STATUS_OK: &str = "200";
pub const STATUS_ERROR: &str = "500";

/// Multi-valued, case-sensitive stream headers.
///
/// Pseudo-headers such as `:path` are not valid HTTP header names, so this
/// is a plain ordered map rather than an `http::HeaderMap`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(BTreeMap<String, Vec<String>>);

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to a single value, replacing earlier values.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// First value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.first().map(String::as_str)
    }

    #[must_use]
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map_or(&[], Vec::as_slice)
    }

    /// Merges `other` in; its keys replace ours.
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One unit on a stream direction. `end` marks the last frame the sender
/// will produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Metadata { metadata: Metadata, end: bool },
    Data { payload: Bytes, end: bool },
}

impl Frame {
    #[must_use]
    pub fn is_end(&self) -> bool {
        match self {
            Self::Metadata { end, .. } | Self::Data { end, .. } => *end,
        }
    }
}
