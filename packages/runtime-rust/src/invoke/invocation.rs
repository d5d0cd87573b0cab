//! Invocation request type and error taxonomy.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use switchyard_core::{
    Codec, CodecError, CodecExt, DataBag, ErrCode, JsonCodec, Receiver, StructuredError,
};
use tokio_util::sync::CancellationToken;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// InvocationContext
// ---------------------------------------------------------------------------

/// Context carried with every invocation through the middleware stack.
#[derive(Clone)]
pub struct InvocationContext {
    /// Process-unique id, for correlating logs.
    pub call_id: u64,
    pub receiver: Receiver,
    /// Codec negotiated for the request; handlers decode and encode with it.
    pub codec: Arc<dyn Codec>,
    /// Per-invocation deadline. `None` uses the runtime default.
    pub timeout: Option<Duration>,
    /// Cancelled when the caller gives up or the deadline passes.
    pub cancel: CancellationToken,
    /// Data threaded through this invocation (claims, step results, ...).
    pub data: DataBag,
}

impl InvocationContext {
    /// Context with a fresh call id, the JSON codec and a new token.
    pub fn new(receiver: Receiver) -> Self {
        Self {
            call_id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
            receiver,
            codec: Arc::new(JsonCodec),
            timeout: None,
            cancel: CancellationToken::new(),
            data: DataBag::new(),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: DataBag) -> Self {
        self.data = data;
        self
    }

    /// Decodes a request payload with the negotiated codec.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` for malformed or mis-shaped payloads.
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        self.codec.decode_as(payload)
    }

    /// Encodes a response with the negotiated codec.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the value cannot be encoded.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError> {
        self.codec.encode_as(value).map(Bytes::from)
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("call_id", &self.call_id)
            .field("receiver", &self.receiver.to_string())
            .field("content_type", &self.codec.content_type())
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("data_keys", &self.data.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// A unary invocation: context plus the opaque request payload.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub ctx: InvocationContext,
    pub payload: Bytes,
}

impl Invocation {
    pub fn new(receiver: Receiver, payload: impl Into<Bytes>) -> Self {
        Self {
            ctx: InvocationContext::new(receiver),
            payload: payload.into(),
        }
    }

    pub fn with_context(ctx: InvocationContext, payload: impl Into<Bytes>) -> Self {
        Self {
            ctx,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn ctx(&self) -> &InvocationContext {
        &self.ctx
    }
}

// ---------------------------------------------------------------------------
// InvocationError
// ---------------------------------------------------------------------------

/// Errors surfaced by dispatch, middleware, and handlers.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("no handler registered for {receiver}")]
    UnknownOperation { receiver: String },
    #[error("{receiver} requires an entity id")]
    MissingEntityId { receiver: String },
    #[error("{receiver} does not accept streams")]
    NotStreaming { receiver: String },
    #[error("{receiver} only accepts streams")]
    StreamOnly { receiver: String },
    #[error("invocation timed out after {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },
    #[error("invocation canceled")]
    Canceled,
    #[error("runtime overloaded, try again later")]
    Overloaded,
    #[error("runtime is shutting down")]
    ShuttingDown,
    /// Recent failures opened the circuit for this namespace.
    #[error("circuit open for {namespace}")]
    CircuitOpen { namespace: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("{0}")]
    Handler(Box<StructuredError>),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StructuredError> for InvocationError {
    fn from(err: StructuredError) -> Self {
        Self::Handler(Box::new(err))
    }
}

impl InvocationError {
    /// Canonical code, as the structured form would carry it.
    #[must_use]
    pub fn code(&self) -> ErrCode {
        match self {
            Self::UnknownOperation { .. } => ErrCode::NotFound,
            Self::MissingEntityId { .. } => ErrCode::InvalidArgument,
            Self::NotStreaming { .. } | Self::StreamOnly { .. } => ErrCode::Unimplemented,
            Self::DeadlineExceeded { .. } => ErrCode::DeadlineExceeded,
            Self::Canceled => ErrCode::Canceled,
            Self::Overloaded => ErrCode::ResourceExhausted,
            Self::ShuttingDown | Self::CircuitOpen { .. } => ErrCode::Unavailable,
            Self::Codec(e) => match e {
                CodecError::Malformed { .. } | CodecError::Shape { .. } => ErrCode::InvalidArgument,
                CodecError::Unsupported { .. } => ErrCode::Unimplemented,
                CodecError::Encode { .. } => ErrCode::Internal,
            },
            Self::Handler(e) => e.code,
            Self::Internal(e) => e
                .downcast_ref::<StructuredError>()
                .map_or(ErrCode::Internal, |structured| structured.code),
        }
    }
}

impl From<InvocationError> for StructuredError {
    fn from(err: InvocationError) -> Self {
        let code = err.code();
        let message = err.to_string();
        match err {
            InvocationError::Codec(e) => e.into(),
            InvocationError::Handler(e) => *e,
            InvocationError::Internal(e) => match e.downcast::<Self>() {
                Ok(structured) => structured,
                Err(e) => {
                    let cause = Self::from(e);
                    Self::new(ErrCode::Internal, message).with_cause(cause)
                }
            },
            _ => Self::new(code, message),
        }
    }
}
