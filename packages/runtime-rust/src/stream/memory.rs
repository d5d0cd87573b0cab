//! In-process duplex transport over bounded `mpsc` channels.
//!
//! A full channel makes `send` wait, which is the backpressure a slow
//! consumer exerts on its peer.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::frame::Frame;
use super::transport::{FrameReceiver, FrameSender};
use super::StreamError;

#[derive(Debug, Clone)]
pub struct MemorySender(mpsc::Sender<Frame>);

#[derive(Debug)]
pub struct MemoryReceiver(mpsc::Receiver<Frame>);

/// One side of a duplex: what it sends and what it receives.
pub type MemoryEnd = (MemorySender, MemoryReceiver);

/// Creates two connected ends, each direction buffering `capacity` frames.
#[must_use]
pub fn duplex(capacity: usize) -> (MemoryEnd, MemoryEnd) {
    let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
    (
        (MemorySender(a_tx), MemoryReceiver(a_rx)),
        (MemorySender(b_tx), MemoryReceiver(b_rx)),
    )
}

#[async_trait]
impl FrameSender for MemorySender {
    async fn send(&self, frame: Frame) -> Result<(), StreamError> {
        self.0.send(frame).await.map_err(|_| StreamError::Closed)
    }

    fn try_send(&self, frame: Frame) -> Result<(), StreamError> {
        self.0.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => StreamError::Full,
            TrySendError::Closed(_) => StreamError::Closed,
        })
    }
}

#[async_trait]
impl FrameReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<Result<Frame, StreamError>> {
        self.0.recv().await.map(Ok)
    }
}
