//! Handler contracts the router dispatches to.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use switchyard_core::StructuredError;

use super::invocation::InvocationContext;
use crate::stream::StreamChannel;

/// Handles a stateless unary operation. The payload is opaque to the router.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: InvocationContext, payload: Bytes) -> Result<Bytes, StructuredError>;
}

/// Handles an operation addressed to a specific entity.
#[async_trait]
pub trait StatefulHandler: Send + Sync + 'static {
    async fn call(
        &self,
        entity_id: &str,
        ctx: InvocationContext,
        payload: Bytes,
    ) -> Result<Bytes, StructuredError>;
}

/// Handles a bidirectional stream. The handler owns the server side of the
/// channel until it returns; an `Err` is sent to the peer as an error frame
/// if the send direction is still open.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    async fn call(&self, ctx: InvocationContext, stream: StreamChannel) -> Result<(), StructuredError>;
}

// ---------------------------------------------------------------------------
// Closure adapters
// ---------------------------------------------------------------------------

/// Adapter returned by [`handler_fn`].
#[derive(Debug, Clone)]
pub struct HandlerFn<F>(F);

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(InvocationContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, StructuredError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(InvocationContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, StructuredError>> + Send + 'static,
{
    async fn call(&self, ctx: InvocationContext, payload: Bytes) -> Result<Bytes, StructuredError> {
        (self.0)(ctx, payload).await
    }
}

/// Adapter returned by [`stateful_fn`].
#[derive(Debug, Clone)]
pub struct StatefulFn<F>(F);

/// Wraps an async closure as a [`StatefulHandler`]. The entity id is passed
/// as an owned string.
pub fn stateful_fn<F, Fut>(f: F) -> StatefulFn<F>
where
    F: Fn(String, InvocationContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, StructuredError>> + Send + 'static,
{
    StatefulFn(f)
}

#[async_trait]
impl<F, Fut> StatefulHandler for StatefulFn<F>
where
    F: Fn(String, InvocationContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, StructuredError>> + Send + 'static,
{
    async fn call(
        &self,
        entity_id: &str,
        ctx: InvocationContext,
        payload: Bytes,
    ) -> Result<Bytes, StructuredError> {
        (self.0)(entity_id.to_string(), ctx, payload).await
    }
}

/// Adapter returned by [`stream_fn`].
#[derive(Debug, Clone)]
pub struct StreamFn<F>(F);

/// Wraps an async closure as a [`StreamHandler`].
pub fn stream_fn<F, Fut>(f: F) -> StreamFn<F>
where
    F: Fn(InvocationContext, StreamChannel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StructuredError>> + Send + 'static,
{
    StreamFn(f)
}

#[async_trait]
impl<F, Fut> StreamHandler for StreamFn<F>
where
    F: Fn(InvocationContext, StreamChannel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StructuredError>> + Send + 'static,
{
    async fn call(&self, ctx: InvocationContext, stream: StreamChannel) -> Result<(), StructuredError> {
        (self.0)(ctx, stream).await
    }
}
