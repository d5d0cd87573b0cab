use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::code::ErrCode;
use super::flat::FlatError;
use crate::value::Value;

/// How much of an error may leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorExposure {
    /// Metadata and causes stay server-side.
    #[default]
    Public,
    /// Metadata is included under `metadata`. For trusted callers only.
    Debug,
}

/// Canonical error envelope propagated across transports.
///
/// `metadata` and `cause` are server-side only: they are skipped by serde and
/// only surface through [`StructuredError::to_value`] with
/// [`ErrorExposure::Debug`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredError {
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub code: ErrCode,
    #[serde(skip_serializing_if = "is_zero")]
    pub status: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip)]
    pub cause: Option<Box<StructuredError>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StructuredError>,
    /// UTC milliseconds since the Unix epoch.
    pub timestamp: u64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u16) -> bool {
    *n == 0
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

impl StructuredError {
    /// Creates an error with the code's default type and status.
    pub fn new(code: ErrCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::from_code(code)
        }
    }

    #[must_use]
    pub fn from_code(code: ErrCode) -> Self {
        Self {
            kind: code.as_str().to_string(),
            code,
            status: code.status(),
            timestamp: now_millis(),
            ..Self::default()
        }
    }

    /// Wraps an underlying error as the cause of a new envelope.
    pub fn wrap(
        err: &(dyn std::error::Error + 'static),
        code: ErrCode,
        message: impl Into<String>,
    ) -> Self {
        Self::new(code, message).with_cause(Self::from_error(err))
    }

    /// Converts any error. A `StructuredError` anywhere at the top of the
    /// chain is reused; otherwise the error becomes `unknown` and its source
    /// chain becomes the cause chain.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(e) = err.downcast_ref::<Self>() {
            return e.clone();
        }
        let mut out = Self::new(ErrCode::Unknown, err.to_string());
        if let Some(source) = err.source() {
            out.cause = Some(Box::new(Self::from_error(source)));
        }
        out
    }

    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Adds one server-side metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Sets a fresh `urn:uuid:` instance identifier.
    #[must_use]
    pub fn with_generated_instance(self) -> Self {
        let id = uuid::Uuid::new_v4();
        self.with_instance(format!("urn:uuid:{id}"))
    }

    #[must_use]
    pub fn with_cause(mut self, cause: StructuredError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_error(mut self, child: StructuredError) -> Self {
        self.errors.push(child);
        self
    }

    // -- tree accessors --

    #[must_use]
    pub fn cause(&self) -> Option<&StructuredError> {
        self.cause.as_deref()
    }

    #[must_use]
    pub fn errors(&self) -> &[StructuredError] {
        &self.errors
    }

    /// Depth-first traversal starting at `self`; a node's cause is visited
    /// before its child errors.
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// The innermost error of the cause chain (`self` if there is none).
    #[must_use]
    pub fn root_cause(&self) -> &StructuredError {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }

    // -- encodings --

    /// Structured representation for a codec. With `Debug` exposure the
    /// metadata is added under `metadata` and the cause chain under `cause`.
    #[must_use]
    pub fn to_value(&self, exposure: ErrorExposure) -> Value {
        let mut value = Value::from_serialize(self).unwrap_or_else(|_| {
            [("code".to_string(), Value::from(self.code.as_str()))]
                .into_iter()
                .collect()
        });
        if exposure == ErrorExposure::Debug {
            if let Value::Map(map) = &mut value {
                if !self.metadata.is_empty() {
                    map.insert("metadata".to_string(), Value::Map(self.metadata.clone()));
                }
                if let Some(cause) = &self.cause {
                    map.insert("cause".to_string(), cause.to_value(exposure));
                }
            }
        }
        value
    }

    /// Flat-text form: the code plus the metadata rendered as strings.
    #[must_use]
    pub fn to_flat(&self) -> FlatError {
        let mut flat = FlatError::from(self.code);
        for (k, v) in &self.metadata {
            flat.insert(k, v);
        }
        flat
    }

    /// Flat text fit for `exposure`: just the code when public, the code
    /// plus metadata when debugging.
    #[must_use]
    pub fn to_flat_exposed(&self, exposure: ErrorExposure) -> FlatError {
        match exposure {
            ErrorExposure::Public => FlatError::from(self.code),
            ErrorExposure::Debug => self.to_flat(),
        }
    }

    /// Builds an envelope from flat text. Metadata becomes string values;
    /// a non-canonical code is kept as the `type` with code `unknown`.
    #[must_use]
    pub fn from_flat(flat: &FlatError) -> Self {
        let mut err = Self::from_code(flat.err_code()).with_kind(flat.code());
        err.metadata = flat
            .metadata()
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        err
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.message.is_empty() {
            f.write_str(&self.message)
        } else if !self.title.is_empty() {
            f.write_str(&self.title)
        } else {
            f.write_str(self.code.as_str())
        }
    }
}

impl std::error::Error for StructuredError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for StructuredError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(e) => e,
            Err(err) => {
                let mut chain: Vec<Self> = err
                    .chain()
                    .map(|e| Self::new(ErrCode::Unknown, e.to_string()))
                    .collect();
                let mut cause: Option<Self> = None;
                while let Some(mut e) = chain.pop() {
                    e.cause = cause.map(Box::new);
                    cause = Some(e);
                }
                cause.unwrap_or_else(|| Self::from_code(ErrCode::Unknown))
            }
        }
    }
}

impl From<FlatError> for StructuredError {
    fn from(flat: FlatError) -> Self {
        Self::from_flat(&flat)
    }
}

impl From<&StructuredError> for FlatError {
    fn from(err: &StructuredError) -> Self {
        err.to_flat()
    }
}

impl From<StructuredError> for FlatError {
    fn from(err: StructuredError) -> Self {
        err.to_flat()
    }
}

/// Iterator returned by [`StructuredError::walk`].
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<&'a StructuredError>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a StructuredError;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.errors.iter().rev());
        if let Some(cause) = node.cause() {
            self.stack.push(cause);
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_fills_code_defaults() {
        let err = StructuredError::new(ErrCode::NotFound, "customer 42 not found");
        assert_eq!(err.kind, "not_found");
        assert_eq!(err.status, 404);
        assert!(err.timestamp > 0);
        assert_eq!(err.to_string(), "customer 42 not found");
        assert_eq!(StructuredError::from_code(ErrCode::Aborted).to_string(), "aborted");
    }

    #[test]
    fn public_encoding_skips_metadata_and_cause() {
        let err = StructuredError::new(ErrCode::Internal, "boom")
            .with_metadata("sql", "select * from secrets")
            .with_cause(StructuredError::new(ErrCode::Unknown, "driver failure"));

        let public = err.to_value(ErrorExposure::Public);
        assert_eq!(public.get("type"), Some(&Value::from("internal")));
        assert_eq!(public.get("code"), Some(&Value::from("internal")));
        assert_eq!(public.get("status"), Some(&Value::Int(500)));
        assert!(public.get("metadata").is_none());
        assert!(public.get("cause").is_none());

        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("secrets"));
        assert!(!json.contains("driver"));

        let debug = err.to_value(ErrorExposure::Debug);
        assert_eq!(
            debug.pointer(["metadata", "sql"].iter()),
            Some(&Value::from("select * from secrets"))
        );
        assert_eq!(
            debug.pointer(["cause", "message"].iter()),
            Some(&Value::from("driver failure"))
        );
    }

    #[test]
    fn public_flat_text_is_code_only() {
        let err = StructuredError::new(ErrCode::InvalidArgument, "malformed input")
            .with_metadata("detail", "key must be a string at line 1 column 2");

        assert_eq!(err.to_flat_exposed(ErrorExposure::Public).to_string(), "invalid_argument");
        let debug = err.to_flat_exposed(ErrorExposure::Debug).to_string();
        assert!(debug.starts_with("invalid_argument\n[detail] key must be"));
    }

    #[test]
    fn deserializes_structured_form() {
        let err: StructuredError = serde_json::from_str(
            r#"{"type":"validation","code":"invalid_argument","status":400,"message":"bad","errors":[{"code":"out_of_range","message":"qty"}]}"#,
        )
        .unwrap();
        assert_eq!(err.kind, "validation");
        assert_eq!(err.code, ErrCode::InvalidArgument);
        assert_eq!(err.errors()[0].code, ErrCode::OutOfRange);
        assert!(err.metadata.is_empty());
    }

    #[test]
    fn walk_visits_cause_before_children() {
        let tree = StructuredError::new(ErrCode::Aborted, "root")
            .with_cause(
                StructuredError::new(ErrCode::Internal, "cause")
                    .with_cause(StructuredError::new(ErrCode::DataLoss, "deep")),
            )
            .with_error(StructuredError::new(ErrCode::InvalidArgument, "child-1"))
            .with_error(StructuredError::new(ErrCode::OutOfRange, "child-2"));

        let order: Vec<&str> = tree.walk().map(|e| e.message.as_str()).collect();
        assert_eq!(order, ["root", "cause", "deep", "child-1", "child-2"]);
        assert_eq!(tree.root_cause().message, "deep");
        assert_eq!(tree.cause().map(|c| c.code), Some(ErrCode::Internal));
    }

    #[test]
    fn from_anyhow_keeps_structured_and_wraps_others() {
        let structured = anyhow::Error::new(StructuredError::new(ErrCode::NotFound, "gone"));
        assert_eq!(StructuredError::from(structured).code, ErrCode::NotFound);

        let plain = anyhow::anyhow!("disk full").context("saving order");
        let err = StructuredError::from(plain);
        assert_eq!(err.code, ErrCode::Unknown);
        assert_eq!(err.message, "saving order");
        assert_eq!(err.root_cause().message, "disk full");
    }

    #[test]
    fn flat_conversion() {
        let err = StructuredError::new(ErrCode::NotFound, "missing").with_metadata("id", 42);
        let flat = err.to_flat();
        assert_eq!(flat.to_string(), "not_found\n[id] 42");

        let back = StructuredError::from_flat(&FlatError::parse("quota_hit\n[limit] 10"));
        assert_eq!(back.code, ErrCode::Unknown);
        assert_eq!(back.kind, "quota_hit");
        assert_eq!(back.metadata.get("limit"), Some(&Value::from("10")));
    }

    #[test]
    fn generated_instance_is_urn() {
        let err = StructuredError::from_code(ErrCode::Internal).with_generated_instance();
        assert!(err.instance.as_deref().is_some_and(|i| i.starts_with("urn:uuid:")));
    }
}
