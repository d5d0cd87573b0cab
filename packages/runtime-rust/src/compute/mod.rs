//! Pooled execution for stateless compute backends.
//!
//! A [`ComputeModule`] is one compiled unit; a [`ComputePool`] keeps a fixed
//! number of its instances and lends them out one invocation at a time.
//! [`ComputeHandler`] exposes a pool to the invocation router.

mod handler;
mod pool;

pub use handler::ComputeHandler;
pub use pool::{ComputePool, PooledInstance};

use async_trait::async_trait;
use bytes::Bytes;
use switchyard_core::{ErrCode, StructuredError};

/// A compiled compute unit that can produce interchangeable instances.
#[async_trait]
pub trait ComputeModule: Send + Sync + 'static {
    type Instance: ComputeInstance;

    /// Name used in logs and pool metrics.
    fn name(&self) -> &str;

    /// Creates a fresh instance.
    ///
    /// # Errors
    ///
    /// Any failure; the pool reports it as [`InstantiationError`].
    async fn instantiate(&self) -> anyhow::Result<Self::Instance>;
}

/// One execution instance. Never runs two invocations at once.
#[async_trait]
pub trait ComputeInstance: Send + 'static {
    /// Runs `operation` with an opaque payload.
    ///
    /// # Errors
    ///
    /// `ComputeError::Application` for errors the operation itself reports;
    /// `ComputeError::Fatal` when the instance is no longer usable.
    async fn invoke(&mut self, operation: &str, payload: Bytes) -> Result<Bytes, ComputeError>;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Waiting for an idle instance failed. Retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("canceled while waiting for a compute instance")]
    Canceled,
    #[error("timed out waiting for a compute instance")]
    TimedOut,
    #[error("compute pool is closed")]
    Closed,
}

impl From<CheckoutError> for StructuredError {
    fn from(err: CheckoutError) -> Self {
        let code = match err {
            CheckoutError::Canceled => ErrCode::Canceled,
            CheckoutError::TimedOut => ErrCode::DeadlineExceeded,
            CheckoutError::Closed => ErrCode::Unavailable,
        };
        Self::new(code, err.to_string())
    }
}

/// Creating an instance failed. Fatal at startup.
#[derive(Debug, thiserror::Error)]
#[error("failed to instantiate compute module {module}")]
pub struct InstantiationError {
    pub module: String,
    #[source]
    pub source: anyhow::Error,
}

impl From<InstantiationError> for StructuredError {
    fn from(err: InstantiationError) -> Self {
        let message = err.to_string();
        let cause = Self::from(err.source);
        Self::new(ErrCode::Internal, message).with_cause(cause)
    }
}

/// An invocation on an instance failed.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// Error reported by the operation. The instance stays usable.
    #[error(transparent)]
    Application(Box<StructuredError>),
    /// The instance trapped or otherwise broke; it is replaced on check-in.
    #[error("compute instance failed: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl ComputeError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<StructuredError> for ComputeError {
    fn from(err: StructuredError) -> Self {
        Self::Application(Box::new(err))
    }
}

impl From<ComputeError> for StructuredError {
    fn from(err: ComputeError) -> Self {
        match err {
            ComputeError::Application(e) => *e,
            ComputeError::Fatal(source) => {
                Self::new(ErrCode::Internal, "compute instance failed").with_cause(source.into())
            }
        }
    }
}
