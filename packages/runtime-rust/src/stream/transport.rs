//! Transport seam for streams. A transport moves frames in order per
//! direction; it does not interpret them.

use async_trait::async_trait;

use super::frame::Frame;
use super::StreamError;

/// Sending half of a transport.
#[async_trait]
pub trait FrameSender: Send + Sync {
    /// Sends one frame, waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Closed` once the peer stopped receiving.
    async fn send(&self, frame: Frame) -> Result<(), StreamError>;

    /// Sends one frame only if the transport can take it right now.
    ///
    /// # Errors
    ///
    /// `StreamError::Full` when there is no capacity, `Closed` once the peer
    /// stopped receiving.
    fn try_send(&self, frame: Frame) -> Result<(), StreamError>;
}

/// Receiving half of a transport.
#[async_trait]
pub trait FrameReceiver: Send + Sync {
    /// Next frame, `None` once the transport is closed. An `Err` reports a
    /// failure delivered in-band (for example by a push source).
    async fn recv(&mut self) -> Option<Result<Frame, StreamError>>;
}
