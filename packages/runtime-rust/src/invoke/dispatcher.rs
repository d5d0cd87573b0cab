//! Entry point for invoking registered operations in-process.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use switchyard_core::{Codecs, Receiver};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info_span, warn, Instrument};

use super::invocation::{Invocation, InvocationContext, InvocationError};
use super::middleware::{build_invocation_pipeline, Admission, InvocationService};
use super::router::{Route, Router};
use crate::config::RuntimeConfig;
use crate::shutdown::ShutdownController;
use crate::stream::{memory, StreamChannel};
use crate::telemetry::INVOCATIONS_TOTAL;

/// Invokes operations by address. Transports and in-process callers depend
/// on this rather than on a concrete dispatcher.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Unary invocation.
    ///
    /// # Errors
    ///
    /// Routing, admission, deadline, and handler failures.
    async fn invoke(&self, receiver: &Receiver, payload: Bytes) -> Result<Bytes, InvocationError>;

    /// Opens a bidirectional stream to a streaming handler and returns the
    /// caller's side.
    ///
    /// # Errors
    ///
    /// `UnknownOperation`, `NotStreaming`, `ShuttingDown`, or `Overloaded`.
    async fn invoke_stream(&self, receiver: &Receiver) -> Result<StreamChannel, InvocationError>;
}

/// Cloneable dispatcher over the composed middleware pipeline.
///
/// Each call runs on its own clone of the pipeline; the route table is shared
/// read-only. Invocations are admitted through the shutdown controller, so
/// none start once draining has begun. Unary calls and open streams share
/// one admission budget of `max_concurrent_invocations`.
#[derive(Clone)]
pub struct Dispatcher {
    service: InvocationService,
    admission: Admission,
    router: Router,
    codecs: Codecs,
    config: Arc<RuntimeConfig>,
    shutdown: Arc<ShutdownController>,
}

impl Dispatcher {
    /// Builds the pipeline around `router`. The standard codecs are used, with
    /// `config.default_content_type` as the default when it is known.
    #[must_use]
    pub fn new(router: Router, config: Arc<RuntimeConfig>, shutdown: Arc<ShutdownController>) -> Self {
        let mut codecs = Codecs::standard();
        if let Err(e) = codecs.set_default(&config.default_content_type) {
            warn!(
                content_type = %config.default_content_type,
                error = %e,
                "unknown default content type; keeping {}",
                codecs.default_codec().content_type()
            );
        }
        let admission = Admission::new(config.max_concurrent_invocations);
        Self {
            service: build_invocation_pipeline(router.clone(), &config, &admission),
            admission,
            router,
            codecs,
            config,
            shutdown,
        }
    }

    /// Replaces the codec set used for negotiation.
    #[must_use]
    pub fn with_codecs(mut self, codecs: Codecs) -> Self {
        self.codecs = codecs;
        self
    }

    #[must_use]
    pub fn codecs(&self) -> &Codecs {
        &self.codecs
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Admission budget shared by unary invocations and streams.
    #[must_use]
    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    /// A fresh context for `receiver` using the default codec.
    #[must_use]
    pub fn context(&self, receiver: &Receiver) -> InvocationContext {
        InvocationContext::new(receiver.clone()).with_codec(self.codecs.default_codec())
    }

    /// Runs a fully built invocation through the pipeline.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` once draining started, otherwise whatever the pipeline
    /// returns.
    pub async fn invoke_with(&self, inv: Invocation) -> Result<Bytes, InvocationError> {
        let Some(_in_flight) = self.shutdown.admit() else {
            return Err(InvocationError::ShuttingDown);
        };
        self.service.clone().oneshot(inv).await
    }

    /// Opens a stream with a prepared context. The handler runs on its own
    /// task with the server side; its error, if any, reaches the caller as an
    /// error frame carrying only what the configured exposure allows.
    ///
    /// # Errors
    ///
    /// See [`Invoker::invoke_stream`]; also `Overloaded` when the admission
    /// budget is spent.
    pub fn open_stream(&self, ctx: InvocationContext) -> Result<StreamChannel, InvocationError> {
        let Some(in_flight) = self.shutdown.admit() else {
            return Err(InvocationError::ShuttingDown);
        };
        let handler = match self.router.route(&ctx.receiver) {
            Some(Route::Stream(handler)) => Arc::clone(handler),
            Some(_) => {
                return Err(InvocationError::NotStreaming {
                    receiver: ctx.receiver.to_string(),
                })
            }
            None => {
                return Err(InvocationError::UnknownOperation {
                    receiver: ctx.receiver.to_string(),
                })
            }
        };
        let slot = self.admission.try_enter(&ctx)?;

        let ((client_tx, client_rx), (server_tx, server_rx)) =
            memory::duplex(self.config.stream_queue_capacity);
        let client = StreamChannel::new(client_tx, client_rx, self.codecs.clone(), CancellationToken::new())
            .with_codec(Arc::clone(&ctx.codec));
        let server = StreamChannel::new(server_tx, server_rx, self.codecs.clone(), ctx.cancel.child_token())
            .with_codec(Arc::clone(&ctx.codec));
        let sender = server.sender();
        let exposure = self.config.error_exposure();

        let span = info_span!("stream", receiver = %ctx.receiver, call_id = ctx.call_id);
        tokio::spawn(
            async move {
                let _in_flight = in_flight;
                let _slot = slot;
                let outcome = match handler.call(ctx, server).await {
                    Ok(()) => {
                        if !sender.is_closed() {
                            if let Err(e) = sender.close().await {
                                debug!(error = %e, "could not close stream");
                            }
                        }
                        "ok"
                    }
                    Err(err) => {
                        warn!(code = %err.code, error = %err, "stream handler failed");
                        if !sender.is_closed() {
                            if let Err(e) = sender.send_error(err.to_flat_exposed(exposure)).await {
                                debug!(error = %e, "could not deliver stream error");
                            }
                        }
                        err.code.as_str()
                    }
                };
                metrics::counter!(INVOCATIONS_TOTAL, "outcome" => outcome).increment(1);
            }
            .instrument(span),
        );
        Ok(client)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("router", &self.router)
            .field("codecs", &self.codecs)
            .field("health", &self.shutdown.health_state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Invoker for Dispatcher {
    async fn invoke(&self, receiver: &Receiver, payload: Bytes) -> Result<Bytes, InvocationError> {
        self.invoke_with(Invocation::with_context(self.context(receiver), payload))
            .await
    }

    async fn invoke_stream(&self, receiver: &Receiver) -> Result<StreamChannel, InvocationError> {
        self.open_stream(self.context(receiver))
    }
}
