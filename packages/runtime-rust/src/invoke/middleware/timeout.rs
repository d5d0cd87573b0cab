//! Deadline and cancellation middleware.
//!
//! Each invocation runs until the first of: completion, its deadline
//! (`ctx.timeout`, else the layer default), or cancellation of `ctx.cancel`.
//! When the deadline passes the token is cancelled too, so work the handler
//! spawned off the same token stops as well.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tower::{Layer, Service};

use crate::invoke::invocation::{Invocation, InvocationError};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing per-invocation deadlines and cancellation.
#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    default_timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            default_timeout: self.default_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    default_timeout: Duration,
}

impl<S> Service<Invocation> for TimeoutService<S>
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
        let timeout = inv.ctx.timeout.unwrap_or(self.default_timeout);
        let cancel = inv.ctx.cancel.clone();
        let fut = self.inner.call(inv);
        Box::pin(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(InvocationError::Canceled),
                result = tokio::time::timeout(timeout, fut) => match result {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        cancel.cancel();
                        #[allow(clippy::cast_possible_truncation)]
                        let timeout_ms = timeout.as_millis() as u64;
                        Err(InvocationError::DeadlineExceeded { timeout_ms })
                    }
                },
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
