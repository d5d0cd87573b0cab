//! Flat-text error encoding for transports that cannot carry structured
//! payloads.
//!
//! ```text
//! not_found
//! [id] 42
//! [kind] customer
//! ```
//!
//! The first line is the symbolic code. Each following line of the form
//! `[key] value` adds one metadata entry; anything else is ignored.

use std::collections::BTreeMap;
use std::fmt;

use super::code::ErrCode;

/// Code used when the input carries none.
const UNKNOWN: &str = "unknown";

/// A symbolic error code plus string metadata, as carried in flat text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatError {
    code: String,
    metadata: BTreeMap<String, String>,
}

impl FlatError {
    /// Creates a flat error. Only the first line of `code` is kept; an empty
    /// code becomes `unknown`.
    pub fn new(code: impl AsRef<str>) -> Self {
        Self {
            code: sanitize_code(code.as_ref()),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry. Line breaks are replaced with spaces so the
    /// entry survives the text encoding.
    #[must_use]
    pub fn with(mut self, key: impl AsRef<str>, value: impl fmt::Display) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl fmt::Display) {
        let value = value.to_string().replace(['\r', '\n'], " ");
        self.metadata.insert(sanitize_key(key.as_ref()), value);
    }

    /// Parses flat text. Never fails: empty input yields `unknown` with no
    /// metadata, and duplicate keys keep the last value.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));
        let code = sanitize_code(lines.next().unwrap_or_default());

        let metadata = lines
            .filter_map(|line| line.strip_prefix('['))
            .filter_map(|line| line.split_once("] "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self { code, metadata }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The code as an [`ErrCode`], `Unknown` if the name is not canonical.
    #[must_use]
    pub fn err_code(&self) -> ErrCode {
        self.code.parse().unwrap_or_default()
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

impl From<ErrCode> for FlatError {
    fn from(code: ErrCode) -> Self {
        Self::new(code.as_str())
    }
}

impl fmt::Display for FlatError {
    /// Canonical form: code, then metadata in key order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)?;
        for (k, v) in &self.metadata {
            write!(f, "\n[{k}] {v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FlatError {}

fn sanitize_code(code: &str) -> String {
    let first = code
        .split('\n')
        .next()
        .unwrap_or_default()
        .trim_end_matches('\r');
    if first.is_empty() {
        UNKNOWN.to_string()
    } else {
        first.to_string()
    }
}

fn sanitize_key(key: &str) -> String {
    let mut key = key.replace(['\r', '\n'], " ");
    while key.contains("] ") {
        key = key.replace("] ", "]");
    }
    key
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn not_found_round_trip() {
        let err = FlatError::new("not_found").with("id", 42).with("kind", "customer");
        let text = err.to_string();
        assert_eq!(text, "not_found\n[id] 42\n[kind] customer");

        let parsed = FlatError::parse(&text);
        assert_eq!(parsed.code(), "not_found");
        assert_eq!(parsed.err_code(), ErrCode::NotFound);
        assert_eq!(parsed.get("id"), Some("42"));
        assert_eq!(parsed.get("kind"), Some("customer"));
        assert_eq!(parsed.metadata().len(), 2);
    }

    #[test]
    fn parse_ignores_noise_and_keeps_last_duplicate() {
        let parsed = FlatError::parse("aborted\nnoise\n[k] one\n[bad line\n[k] two\r\n[v] a] b");
        assert_eq!(parsed.code(), "aborted");
        assert_eq!(parsed.get("k"), Some("two"));
        assert_eq!(parsed.get("v"), Some("a] b"));
        assert_eq!(parsed.metadata().len(), 2);
    }

    #[test]
    fn empty_input_is_unknown() {
        let parsed = FlatError::parse("");
        assert_eq!(parsed.code(), "unknown");
        assert!(parsed.metadata().is_empty());
        assert_eq!(FlatError::new("").code(), "unknown");
    }

    #[test]
    fn builder_values_cannot_break_lines() {
        let err = FlatError::new("internal\nextra").with("msg", "line1\nline2");
        let parsed = FlatError::parse(&err.to_string());
        assert_eq!(parsed, err);
        assert_eq!(parsed.get("msg"), Some("line1 line2"));
    }

    fn arb_text() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop::sample::select(vec!['[', ']', ' ', '\n', '\r', 'a', 'b', 'k']),
            0..48,
        )
        .prop_map(String::from_iter)
    }

    proptest! {
        #[test]
        fn text_stabilizes_after_one_round_trip(text in arb_text()) {
            let once = FlatError::parse(&text);
            let twice = FlatError::parse(&once.to_string());
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(once.to_string(), twice.to_string());
        }
    }
}
