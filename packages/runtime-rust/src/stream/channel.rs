//! Codec-aware bidirectional stream over a frame transport.
//!
//! Each direction is terminated at most once: by a frame with `end` set, an
//! explicit [`StreamSender::close`], or an abort. Reads past the end of the
//! receive direction return `Ok(None)` immediately.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use switchyard_core::codec::CONTENT_TYPE_TEXT;
use switchyard_core::{Codec, Codecs, ErrCode, FlatError, StructuredError, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::frame::{self, Frame, Metadata};
use super::memory;
use super::transport::{FrameReceiver, FrameSender};
use super::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Open,
    Ended,
    Errored,
}

struct SendShared {
    transport: tokio::sync::Mutex<Box<dyn FrameSender>>,
    state: Mutex<SendState>,
    codec: Mutex<Arc<dyn Codec>>,
    cancel: CancellationToken,
}

/// Sending half of a [`StreamChannel`]. Cloneable so a supervisor can still
/// terminate the stream after handing the channel to a handler.
#[derive(Clone)]
pub struct StreamSender {
    shared: Arc<SendShared>,
}

impl StreamSender {
    /// Sends a metadata frame.
    ///
    /// # Errors
    ///
    /// `StreamError::Protocol` if the send direction already ended (the
    /// stream is aborted), `Closed` if the peer is gone, `Canceled` if the
    /// channel's token fires while waiting for capacity.
    pub async fn send_metadata(&self, metadata: Metadata, end: bool) -> Result<(), StreamError> {
        self.send_frame(Frame::Metadata { metadata, end }).await
    }

    /// Sends a raw data frame.
    ///
    /// # Errors
    ///
    /// See [`StreamSender::send_metadata`].
    pub async fn send_data(&self, payload: impl Into<Bytes>, end: bool) -> Result<(), StreamError> {
        self.send_frame(Frame::Data {
            payload: payload.into(),
            end,
        })
        .await
    }

    /// Encodes `value` with the negotiated codec and sends it as data.
    ///
    /// # Errors
    ///
    /// `StreamError::Codec` if encoding fails, otherwise as
    /// [`StreamSender::send_metadata`].
    pub async fn send_value(&self, value: &Value, end: bool) -> Result<(), StreamError> {
        let payload = self.codec().encode(value)?;
        self.send_data(payload, end).await
    }

    /// One metadata frame (with `content-type` filled in) followed by one
    /// terminal data frame, or a terminal metadata frame when there is no
    /// value.
    ///
    /// # Errors
    ///
    /// See [`StreamSender::send_value`].
    pub async fn send_unary(&self, mut metadata: Metadata, value: Option<&Value>) -> Result<(), StreamError> {
        let codec = self.codec();
        if metadata.get(frame::CONTENT_TYPE).is_none() {
            metadata.insert(frame::CONTENT_TYPE, codec.content_type());
        }
        match value {
            Some(value) => {
                let payload = codec.encode(value)?;
                self.send_metadata(metadata, false).await?;
                self.send_data(payload, true).await
            }
            None => self.send_metadata(metadata, true).await,
        }
    }

    /// Opens a request: `:path` and `content-type` headers, then the value.
    ///
    /// # Errors
    ///
    /// See [`StreamSender::send_value`].
    pub async fn send_request(&self, path: &str, value: Option<&Value>) -> Result<(), StreamError> {
        self.send_unary(Metadata::new().with(frame::PATH, path), value)
            .await
    }

    /// Successful reply with `:status` 200.
    ///
    /// # Errors
    ///
    /// See [`StreamSender::send_value`].
    pub async fn send_reply(&self, value: Option<&Value>) -> Result<(), StreamError> {
        self.send_unary(Metadata::new().with(frame::STATUS, frame::STATUS_OK), value)
            .await
    }

    /// Error reply with `:status` 500. The payload is the flat-text encoding
    /// so any peer can read it regardless of codec.
    ///
    /// # Errors
    ///
    /// See [`StreamSender::send_metadata`].
    pub async fn send_error(&self, err: impl Into<FlatError>) -> Result<(), StreamError> {
        let flat: FlatError = err.into();
        let metadata = Metadata::new()
            .with(frame::STATUS, frame::STATUS_ERROR)
            .with(frame::CONTENT_TYPE, CONTENT_TYPE_TEXT);
        self.send_metadata(metadata, false).await?;
        self.send_data(flat.to_string(), true).await
    }

    /// Ends the send direction with an empty terminal metadata frame.
    ///
    /// # Errors
    ///
    /// See [`StreamSender::send_metadata`].
    pub async fn close(&self) -> Result<(), StreamError> {
        self.send_metadata(Metadata::new(), true).await
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.state.lock() != SendState::Open
    }

    #[must_use]
    pub fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.shared.codec.lock())
    }

    fn set_codec(&self, codec: Arc<dyn Codec>) {
        *self.shared.codec.lock() = codec;
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), StreamError> {
        let transport = self.shared.transport.lock().await;
        if self.is_closed() {
            warn!("send after the stream's send direction ended; aborting stream");
            self.abort();
            return Err(StreamError::Protocol {
                reason: "send after end of stream",
            });
        }

        let end = frame.is_end();
        let result = tokio::select! {
            biased;
            () = self.shared.cancel.cancelled() => Err(StreamError::Canceled),
            sent = transport.send(frame) => sent,
        };

        let mut state = self.shared.state.lock();
        match result {
            Ok(()) => {
                if end {
                    *state = SendState::Ended;
                }
                Ok(())
            }
            Err(e) => {
                *state = SendState::Errored;
                Err(e)
            }
        }
    }

    /// Marks the send direction errored and cancels the channel.
    fn abort(&self) {
        *self.shared.state.lock() = SendState::Errored;
        self.shared.cancel.cancel();
    }

    /// Cancellation path: marks the direction errored, then reports
    /// `canceled` to the peer if the transport takes the frames right away.
    /// Never waits on the transport or on a concurrent send.
    fn fail_canceled(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state != SendState::Open {
                return;
            }
            *state = SendState::Errored;
        }
        let Ok(transport) = self.shared.transport.try_lock() else {
            debug!("send in flight during cancellation; skipping canceled frame");
            return;
        };
        let flat = FlatError::from(ErrCode::Canceled);
        let frames = [
            Frame::Metadata {
                metadata: Metadata::new()
                    .with(frame::STATUS, frame::STATUS_ERROR)
                    .with(frame::CONTENT_TYPE, CONTENT_TYPE_TEXT),
                end: false,
            },
            Frame::Data {
                payload: Bytes::from(flat.to_string()),
                end: true,
            },
        ];
        for frame in frames {
            if let Err(e) = transport.try_send(frame) {
                debug!(error = %e, "canceled frame not delivered");
                break;
            }
        }
    }
}

impl std::fmt::Debug for StreamSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSender")
            .field("state", &*self.shared.state.lock())
            .field("content_type", &self.codec().content_type())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StreamChannel
// ---------------------------------------------------------------------------

/// One side of a bidirectional stream.
pub struct StreamChannel {
    tx: StreamSender,
    rx: Box<dyn FrameReceiver>,
    codecs: Codecs,
    recv_closed: bool,
    /// Data frame whose decode failed; retried by the next receive.
    pending: Option<Bytes>,
    /// The peer announced `:status` 500; its data frame is flat text.
    remote_error: bool,
    metadata: Metadata,
}

impl StreamChannel {
    /// Wraps a transport. Payloads use the default codec of `codecs` until a
    /// received `content-type` header selects another.
    ///
    /// When `cancel` fires, pending operations fail with
    /// `StreamError::Canceled` and the stream is marked errored. Aborting the
    /// stream cancels `cancel` in turn; pass a child token to keep that local.
    pub fn new(
        sender: impl FrameSender + 'static,
        receiver: impl FrameReceiver + 'static,
        codecs: Codecs,
        cancel: CancellationToken,
    ) -> Self {
        let shared = SendShared {
            transport: tokio::sync::Mutex::new(Box::new(sender)),
            state: Mutex::new(SendState::Open),
            codec: Mutex::new(codecs.default_codec()),
            cancel,
        };
        Self {
            tx: StreamSender {
                shared: Arc::new(shared),
            },
            rx: Box::new(receiver),
            codecs,
            recv_closed: false,
            pending: None,
            remote_error: false,
            metadata: Metadata::new(),
        }
    }

    /// Two connected channels over an in-memory duplex with `capacity`
    /// frames of buffering per direction.
    #[must_use]
    pub fn pair(capacity: usize, codecs: &Codecs) -> (Self, Self) {
        let ((a_tx, a_rx), (b_tx, b_rx)) = memory::duplex(capacity);
        (
            Self::new(a_tx, a_rx, codecs.clone(), CancellationToken::new()),
            Self::new(b_tx, b_rx, codecs.clone(), CancellationToken::new()),
        )
    }

    /// Uses `codec` for payloads.
    #[must_use]
    pub fn with_codec(self, codec: Arc<dyn Codec>) -> Self {
        self.tx.set_codec(codec);
        self
    }

    /// The token this channel observes.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.tx.shared.cancel
    }

    /// Handle to the send direction.
    #[must_use]
    pub fn sender(&self) -> StreamSender {
        self.tx.clone()
    }

    /// Metadata received so far, later frames overriding earlier keys.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn is_send_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[must_use]
    pub fn is_recv_closed(&self) -> bool {
        self.recv_closed && self.pending.is_none()
    }

    // -- send direction ------------------------------------------------------

    /// # Errors
    ///
    /// See [`StreamSender::send_metadata`].
    pub async fn send_metadata(&self, metadata: Metadata, end: bool) -> Result<(), StreamError> {
        self.tx.send_metadata(metadata, end).await
    }

    /// # Errors
    ///
    /// See [`StreamSender::send_data`].
    pub async fn send_data(&self, payload: impl Into<Bytes>, end: bool) -> Result<(), StreamError> {
        self.tx.send_data(payload, end).await
    }

    /// # Errors
    ///
    /// See [`StreamSender::send_value`].
    pub async fn send_value(&self, value: &Value, end: bool) -> Result<(), StreamError> {
        self.tx.send_value(value, end).await
    }

    /// # Errors
    ///
    /// See [`StreamSender::send_unary`].
    pub async fn send_unary(&self, metadata: Metadata, value: Option<&Value>) -> Result<(), StreamError> {
        self.tx.send_unary(metadata, value).await
    }

    /// # Errors
    ///
    /// See [`StreamSender::send_request`].
    pub async fn send_request(&self, path: &str, value: Option<&Value>) -> Result<(), StreamError> {
        self.tx.send_request(path, value).await
    }

    /// # Errors
    ///
    /// See [`StreamSender::send_reply`].
    pub async fn send_reply(&self, value: Option<&Value>) -> Result<(), StreamError> {
        self.tx.send_reply(value).await
    }

    /// # Errors
    ///
    /// See [`StreamSender::send_error`].
    pub async fn send_error(&self, err: impl Into<FlatError>) -> Result<(), StreamError> {
        self.tx.send_error(err).await
    }

    /// # Errors
    ///
    /// See [`StreamSender::close`].
    pub async fn close_send(&self) -> Result<(), StreamError> {
        self.tx.close().await
    }

    // -- receive direction ---------------------------------------------------

    /// Next data frame, decoded with the negotiated codec. `Ok(None)` is end
    /// of stream.
    ///
    /// # Errors
    ///
    /// `StreamError::Codec` on a decode failure; the frame stays in place
    /// and the next call retries it. `Remote` when the peer sent an error,
    /// `Reset` when its transport closed without a terminal frame,
    /// `Canceled` when the channel's token fired.
    pub async fn recv_data(&mut self) -> Result<Option<Value>, StreamError> {
        let Some(payload) = self.next_payload().await? else {
            return Ok(None);
        };
        let value = self.tx.codec().decode(&payload)?;
        self.pending = None;
        Ok(Some(value))
    }

    /// Like [`StreamChannel::recv_data`], decoding into `T`. A shape mismatch
    /// also leaves the frame in place.
    ///
    /// # Errors
    ///
    /// See [`StreamChannel::recv_data`].
    pub async fn recv_data_as<T: DeserializeOwned>(&mut self) -> Result<Option<T>, StreamError> {
        let Some(payload) = self.next_payload().await? else {
            return Ok(None);
        };
        let value = self.tx.codec().decode(&payload)?;
        let typed = value
            .deserialize_into()
            .map_err(switchyard_core::CodecError::from)?;
        self.pending = None;
        Ok(Some(typed))
    }

    /// Next data frame as raw bytes. Always advances.
    ///
    /// # Errors
    ///
    /// See [`StreamChannel::recv_data`], minus decode failures.
    pub async fn recv_bytes(&mut self) -> Result<Option<Bytes>, StreamError> {
        let payload = self.next_payload().await?;
        self.pending = None;
        Ok(payload)
    }

    /// Fills `pending` with the next data payload and returns a handle to it,
    /// consuming metadata frames on the way.
    async fn next_payload(&mut self) -> Result<Option<Bytes>, StreamError> {
        loop {
            if let Some(payload) = &self.pending {
                return Ok(Some(payload.clone()));
            }
            if self.recv_closed {
                return Ok(None);
            }

            let cancel = self.tx.shared.cancel.clone();
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = self.rx.recv() => Some(next),
            };
            let Some(next) = received else {
                self.recv_closed = true;
                self.tx.fail_canceled();
                return Err(StreamError::Canceled);
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.recv_closed = true;
                    return Err(e);
                }
                None => {
                    self.recv_closed = true;
                    debug!("stream transport closed without a terminal frame");
                    return Err(StreamError::Reset);
                }
            };

            match frame {
                Frame::Metadata { metadata, end } => {
                    self.absorb_metadata(&metadata);
                    if end {
                        self.recv_closed = true;
                    }
                }
                Frame::Data { payload, end } => {
                    if end {
                        self.recv_closed = true;
                    }
                    if self.remote_error {
                        let text = String::from_utf8_lossy(&payload);
                        let err = StructuredError::from_flat(&FlatError::parse(&text));
                        return Err(StreamError::Remote(Box::new(err)));
                    }
                    self.pending = Some(payload);
                }
            }
        }
    }

    fn absorb_metadata(&mut self, metadata: &Metadata) {
        self.metadata.merge(metadata);
        if metadata.get(frame::STATUS) == Some(frame::STATUS_ERROR) {
            self.remote_error = true;
            return;
        }
        if let Some(content_type) = metadata.get(frame::CONTENT_TYPE) {
            match self.codecs.get(content_type) {
                Ok(codec) => self.tx.set_codec(codec),
                Err(_) => warn!(content_type, "peer announced an unsupported content type"),
            }
        }
    }
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("tx", &self.tx)
            .field("recv_closed", &self.recv_closed)
            .field("pending", &self.pending.is_some())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
