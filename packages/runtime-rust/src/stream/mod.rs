//! Bidirectional streaming.
//!
//! - [`Frame`] / [`Metadata`]: the ordered unit exchanged per direction
//! - [`FrameSender`] / [`FrameReceiver`]: the transport seam
//! - [`memory`]: bounded in-process duplex transport
//! - [`StreamChannel`]: codec-aware send/receive with completion tracking
//! - [`source`]: bounded push -> pull bridge for producer tasks

pub mod channel;
pub mod frame;
pub mod memory;
pub mod source;
pub mod transport;

pub use channel::{StreamChannel, StreamSender};
pub use frame::{Frame, Metadata};
pub use transport::{FrameReceiver, FrameSender};

use switchyard_core::{CodecError, ErrCode, StructuredError};

/// Errors from stream operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Local misuse, such as sending after the send direction ended. The
    /// stream is aborted.
    #[error("stream protocol violation: {reason}")]
    Protocol { reason: &'static str },
    /// The peer's transport went away without a terminal frame.
    #[error("stream reset by peer")]
    Reset,
    /// The peer no longer receives frames.
    #[error("stream closed by peer")]
    Closed,
    /// A non-blocking send found the transport buffer full.
    #[error("stream transport full")]
    Full,
    #[error("stream canceled")]
    Canceled,
    /// The peer sent an error frame.
    #[error("remote error: {0}")]
    Remote(Box<StructuredError>),
    /// A frame could not be encoded or decoded. Decode failures leave the
    /// frame in place.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<StreamError> for StructuredError {
    fn from(err: StreamError) -> Self {
        let message = err.to_string();
        match err {
            StreamError::Protocol { .. } => Self::new(ErrCode::FailedPrecondition, message),
            StreamError::Reset | StreamError::Closed => Self::new(ErrCode::Unavailable, message),
            StreamError::Full => Self::new(ErrCode::ResourceExhausted, message),
            StreamError::Canceled => Self::new(ErrCode::Canceled, message),
            StreamError::Remote(e) => *e,
            StreamError::Codec(e) => e.into(),
        }
    }
}
