//! Retry policy for unary invocations.
//!
//! Plugs into tower's `Retry` middleware. A failed attempt is retried after
//! an exponential backoff when its code is retryable and the invocation's
//! token has not fired. The token fires on deadline too, so an invocation
//! that ran out of time is never retried. A refused circuit or a draining
//! runtime is final.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tower::retry::{Policy, RetryLayer};
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::invoke::invocation::{Invocation, InvocationError};
use crate::telemetry::INVOCATION_RETRIES_TOTAL;

/// Per-call retry state. The layer clones the policy for every call, so
/// `retries` counts attempts of one invocation only.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    retries: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config, retries: 0 }
    }

    /// The policy wrapped in a tower layer.
    #[must_use]
    pub fn layer(config: RetryConfig) -> RetryLayer<Self> {
        RetryLayer::new(Self::new(config))
    }
}

/// Whether another attempt could succeed where this one failed.
#[must_use]
pub fn is_retryable(err: &InvocationError) -> bool {
    match err {
        InvocationError::CircuitOpen { .. } | InvocationError::ShuttingDown => false,
        other => other.code().is_retryable(),
    }
}

impl Policy<Invocation, Bytes, InvocationError> for RetryPolicy {
    type Future = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn retry(
        &mut self,
        inv: &mut Invocation,
        result: &mut Result<Bytes, InvocationError>,
    ) -> Option<Self::Future> {
        let err = match result {
            Ok(_) => {
                if self.retries > 0 {
                    info!(
                        receiver = %inv.ctx.receiver,
                        call_id = inv.ctx.call_id,
                        retries = self.retries,
                        "invocation recovered"
                    );
                }
                return None;
            }
            Err(err) => err,
        };
        if self.retries >= self.config.max_retries
            || inv.ctx.cancel.is_cancelled()
            || !is_retryable(err)
        {
            return None;
        }

        let delay = self.config.backoff(self.retries);
        self.retries += 1;
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        warn!(
            receiver = %inv.ctx.receiver,
            call_id = inv.ctx.call_id,
            retry = self.retries,
            delay_ms,
            error = %err,
            "invocation failed; retrying"
        );
        metrics::counter!(
            INVOCATION_RETRIES_TOTAL,
            "namespace" => inv.ctx.receiver.namespace().to_string()
        )
        .increment(1);

        let cancel = inv.ctx.cancel.clone();
        Some(Box::pin(async move {
            // A token that fires mid-backoff wakes the retry early; the next
            // attempt then fails as canceled.
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {}
            }
        }))
    }

    fn clone_request(&mut self, inv: &Invocation) -> Option<Invocation> {
        Some(inv.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
