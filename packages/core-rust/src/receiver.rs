//! Invocation addressing.
//!
//! Wire form is `"<namespace>/<operation>"` for stateless targets and
//! `"<namespace>/<entity_id>/<operation>"` for stateful ones. A leading `/`
//! is tolerated so HTTP-style paths parse unchanged.

use std::fmt;
use std::str::FromStr;

/// Errors from parsing an invocation address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invocation address is empty")]
    Empty,
    #[error("invalid invocation address {path:?}: expected namespace/operation or namespace/id/operation")]
    Malformed { path: String },
    #[error("invalid invocation address {path:?}: empty segment")]
    EmptySegment { path: String },
}

/// Resolved invocation address. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receiver {
    namespace: String,
    operation: String,
    entity_id: Option<String>,
}

impl Receiver {
    /// Address of a stateless operation.
    pub fn new(namespace: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            operation: operation.into(),
            entity_id: None,
        }
    }

    /// Address of an operation on a specific entity.
    pub fn stateful(
        namespace: impl Into<String>,
        entity_id: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            operation: operation.into(),
            entity_id: Some(entity_id.into()),
        }
    }

    /// Parses the wire form of an address.
    ///
    /// # Errors
    ///
    /// Returns `AddressError` when the path is empty, has the wrong number of
    /// segments, or contains an empty segment.
    pub fn parse(path: &str) -> Result<Self, AddressError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(AddressError::EmptySegment {
                path: path.to_string(),
            });
        }

        match parts.as_slice() {
            [namespace, operation] => Ok(Self::new(*namespace, *operation)),
            [namespace, id, operation] => Ok(Self::stateful(*namespace, *id, *operation)),
            _ => Err(AddressError::Malformed {
                path: path.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    #[must_use]
    pub fn is_stateful(&self) -> bool {
        self.entity_id.is_some()
    }

    /// Splits the namespace at its last `.` or `:` into `(namespace, service)`,
    /// e.g. `customers.v1.Inbound` -> `("customers.v1", "Inbound")`.
    #[must_use]
    pub fn service(&self) -> Option<(&str, &str)> {
        let idx = self.namespace.rfind(['.', ':'])?;
        Some((&self.namespace[..idx], &self.namespace[idx + 1..]))
    }

    /// Message-broker subject for this address: `<namespace>.<operation>`.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("{}.{}", self.namespace, self.operation)
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity_id {
            Some(id) => write!(f, "{}/{}/{}", self.namespace, id, self.operation),
            None => write!(f, "{}/{}", self.namespace, self.operation),
        }
    }
}

impl FromStr for Receiver {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
