//! Instrumentation middleware.
//!
//! Wraps each invocation in an `invocation` span and records
//! `switchyard_invocations_total{outcome}` and
//! `switchyard_invocation_duration_ms` through the `metrics` facade. No
//! exporter is installed here; without one the measurements are dropped.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::invoke::invocation::{Invocation, InvocationError};
use crate::telemetry::{INVOCATIONS_TOTAL, INVOCATION_DURATION_MS};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

fn outcome(result: &Result<Bytes, InvocationError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(InvocationError::DeadlineExceeded { .. }) => "deadline_exceeded",
        Err(InvocationError::Canceled) => "canceled",
        Err(InvocationError::Overloaded) => "overloaded",
        Err(InvocationError::CircuitOpen { .. }) => "circuit_open",
        Err(InvocationError::Handler(e)) => e.code.as_str(),
        Err(_) => "error",
    }
}

impl<S> Service<Invocation> for MetricsService<S>
where
    S: Service<Invocation, Response = Bytes, Error = InvocationError> + Send,
    S::Future: Send + 'static,
{
    type Response = Bytes;
    type Error = InvocationError;
    type Future = Pin<Box<dyn Future<Output = Result<Bytes, InvocationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, inv: Invocation) -> Self::Future {
        let receiver = inv.ctx.receiver.to_string();
        let call_id = inv.ctx.call_id;
        let span = info_span!(
            "invocation",
            receiver = %receiver,
            call_id,
            content_type = inv.ctx.codec.content_type(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(inv);
        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                metrics::counter!(INVOCATIONS_TOTAL, "outcome" => outcome).increment(1);
                metrics::histogram!(INVOCATION_DURATION_MS).record(elapsed.as_secs_f64() * 1000.0);

                match &result {
                    Err(InvocationError::Handler(e)) if e.status >= 500 => {
                        tracing::warn!(
                            receiver = %receiver,
                            code = %e.code,
                            error = %e,
                            metadata = ?e.metadata,
                            "invocation failed"
                        );
                    }
                    Err(e @ InvocationError::Internal(_)) => {
                        tracing::warn!(receiver = %receiver, error = %e, "invocation failed");
                    }
                    _ => tracing::debug!(receiver = %receiver, duration_ms, outcome, "invocation complete"),
                }
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use switchyard_core::{ErrCode, Receiver, StructuredError};
    use tower::ServiceExt;

    use super::*;

    /// Completes immediately, failing for operation `fail`.
    struct ImmediateService;

    impl Service<Invocation> for ImmediateService {
        type Response = Bytes;
        type Error = InvocationError;
        type Future = Pin<Box<dyn Future<Output = Result<Bytes, InvocationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, inv: Invocation) -> Self::Future {
            let fail = inv.ctx.receiver.operation() == "fail";
            Box::pin(async move {
                if fail {
                    Err(StructuredError::new(ErrCode::Internal, "boom").into())
                } else {
                    Ok(inv.payload)
                }
            })
        }
    }

    #[tokio::test]
    async fn passes_response_through() {
        let svc = MetricsLayer.layer(ImmediateService);
        let resp = svc
            .oneshot(Invocation::new(Receiver::new("ns", "ok"), "x"))
            .await
            .unwrap();
        assert_eq!(resp, Bytes::from("x"));
    }

    #[tokio::test]
    async fn passes_errors_through_and_labels_them() {
        let svc = MetricsLayer.layer(ImmediateService);
        let result = svc
            .oneshot(Invocation::new(Receiver::new("ns", "fail"), "x"))
            .await;
        assert_eq!(outcome(&result), "internal");
        assert!(result.is_err());
    }
}
