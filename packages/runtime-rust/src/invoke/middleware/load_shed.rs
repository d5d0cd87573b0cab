//! Admission control shared by unary invocations and streams.
//!
//! One [`Admission`] budget covers all work the dispatcher starts. The
//! pipeline's [`LoadShedLayer`] holds a slot per unary invocation until its
//! future completes or is dropped; the dispatcher holds one per stream until
//! the handler returns. Work over budget is refused with
//! `InvocationError::Overloaded` instead of queueing. An invocation whose
//! token already fired is refused as `Canceled` and takes no slot.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};
use tracing::debug;

use crate::invoke::invocation::{Invocation, InvocationContext, InvocationError};
use crate::telemetry::INVOCATIONS_SHED_TOTAL;

/// Concurrency budget. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct Admission {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl Admission {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        let capacity = max_concurrent as usize;
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Takes a slot for the invocation described by `ctx`.
    ///
    /// # Errors
    ///
    /// `Canceled` if the invocation's token already fired, `Overloaded` if
    /// every slot is taken.
    pub fn try_enter(&self, ctx: &InvocationContext) -> Result<AdmissionSlot, InvocationError> {
        if ctx.cancel.is_cancelled() {
            return Err(InvocationError::Canceled);
        }
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Ok(AdmissionSlot { _permit: permit }),
            Err(_) => {
                debug!(
                    receiver = %ctx.receiver,
                    call_id = ctx.call_id,
                    capacity = self.capacity,
                    "shedding invocation"
                );
                metrics::counter!(
                    INVOCATIONS_SHED_TOTAL,
                    "namespace" => ctx.receiver.namespace().to_string()
                )
                .increment(1);
                Err(InvocationError::Overloaded)
            }
        }
    }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Slots currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

/// A held slot. Dropping it gives the slot back.
#[derive(Debug)]
#[must_use = "the slot is released as soon as it is dropped"]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer admitting unary invocations through an [`Admission`].
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    admission: Admission,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(admission: Admission) -> Self {
        Self { admission }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            admission: self.admission.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    admission: Admission,
}

impl<S> Service<Invocation> for LoadShedService<S>
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
        let slot = match self.admission.try_enter(&inv.ctx) {
            Ok(slot) => slot,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let fut = self.inner.call(inv);
        Box::pin(async move {
            let _slot = slot;
            fut.await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
