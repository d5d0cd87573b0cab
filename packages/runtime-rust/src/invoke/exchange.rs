//! Transport-facing adapter: `{path, content-type, body}` in,
//! `{status, content-type, body}` out.
//!
//! A transport (HTTP router, broker consumer) hands raw requests here and
//! writes the response back in its own terms. Errors are encoded with the
//! negotiated codec when it can carry structure, and as flat text otherwise.

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use switchyard_core::codec::CONTENT_TYPE_TEXT;
use switchyard_core::{Codec, ErrorExposure, Receiver, StructuredError};
use tracing::debug;

use super::dispatcher::Dispatcher;
use super::invocation::Invocation;

/// A raw request as a transport received it.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRequest {
    /// Invocation address, e.g. `/orders.v1.Orders/place`.
    pub path: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ExchangeRequest {
    pub fn new(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            content_type: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// What the transport writes back.
#[derive(Debug, Clone)]
pub struct ExchangeResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct Exchange {
    dispatcher: Dispatcher,
    exposure: ErrorExposure,
}

impl Exchange {
    /// Error exposure follows the dispatcher's `expose_error_metadata`.
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        let exposure = dispatcher.config().error_exposure();
        Self {
            dispatcher,
            exposure,
        }
    }

    /// Parses the address, negotiates the codec, dispatches, and encodes the
    /// outcome. Never fails: every error becomes an error response.
    pub async fn handle(&self, req: ExchangeRequest) -> ExchangeResponse {
        let codec = match self.dispatcher.codecs().negotiate(req.content_type.as_deref()) {
            Ok(codec) => codec,
            Err(e) => {
                debug!(content_type = ?req.content_type, "rejecting request: {e}");
                return self.flat_response(&StructuredError::from(e));
            }
        };

        let receiver = match Receiver::parse(&req.path) {
            Ok(receiver) => receiver,
            Err(e) => return self.error_response(codec.as_ref(), &e.into()),
        };

        let ctx = self
            .dispatcher
            .context(&receiver)
            .with_codec(Arc::clone(&codec));
        match self.dispatcher.invoke_with(Invocation::with_context(ctx, req.body)).await {
            Ok(body) => ExchangeResponse {
                status: StatusCode::OK,
                content_type: codec.content_type().to_string(),
                body,
            },
            Err(e) => self.error_response(codec.as_ref(), &e.into()),
        }
    }

    fn error_response(&self, codec: &dyn Codec, err: &StructuredError) -> ExchangeResponse {
        if !codec.supports_structured() {
            return self.flat_response(err);
        }
        match codec.encode(&err.to_value(self.exposure)) {
            Ok(body) => ExchangeResponse {
                status: status_of(err),
                content_type: codec.content_type().to_string(),
                body: Bytes::from(body),
            },
            Err(e) => {
                debug!(error = %e, detail = e.detail(), "could not encode error; sending flat text");
                self.flat_response(err)
            }
        }
    }

    fn flat_response(&self, err: &StructuredError) -> ExchangeResponse {
        let flat = err.to_flat_exposed(self.exposure);
        ExchangeResponse {
            status: status_of(err),
            content_type: CONTENT_TYPE_TEXT.to_string(),
            body: Bytes::from(flat.to_string()),
        }
    }
}

fn status_of(err: &StructuredError) -> StatusCode {
    StatusCode::from_u16(err.status)
        .ok()
        .filter(|s| s.is_client_error() || s.is_server_error())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
