//! Invocation routing: dispatches an `Invocation` to the handler registered
//! for its (namespace, operation).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use switchyard_core::Receiver;
use tower::Service;

use super::handler::{Handler, StatefulHandler, StreamHandler};
use super::invocation::{Invocation, InvocationError};

type BoxedFuture = Pin<Box<dyn Future<Output = Result<Bytes, InvocationError>> + Send>>;

/// Startup-time registration failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("a handler is already registered for {namespace}/{operation}")]
    Duplicate { namespace: String, operation: String },
}

/// A registered handler of one of the three invocation shapes.
#[derive(Clone)]
pub enum Route {
    Unary(Arc<dyn Handler>),
    Stateful(Arc<dyn StatefulHandler>),
    Stream(Arc<dyn StreamHandler>),
}

impl Route {
    fn kind(&self) -> &'static str {
        match self {
            Self::Unary(_) => "unary",
            Self::Stateful(_) => "stateful",
            Self::Stream(_) => "stream",
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes invocations by `(namespace, operation)`.
///
/// Routes are registered during startup; afterwards the table is shared
/// read-only, so cloning a router per invocation is a reference-count bump.
/// Unregistered addresses return `InvocationError::UnknownOperation`.
#[derive(Clone, Default)]
pub struct Router {
    routes: Arc<HashMap<String, HashMap<String, Route>>>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stateless handler.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Duplicate` if the pair is taken.
    pub fn register<H: Handler>(
        &mut self,
        namespace: &str,
        operation: &str,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        self.insert_new(namespace, operation, Route::Unary(Arc::new(handler)))
    }

    /// Registers a handler that receives the entity id from the address.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Duplicate` if the pair is taken.
    pub fn register_stateful<H: StatefulHandler>(
        &mut self,
        namespace: &str,
        operation: &str,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        self.insert_new(namespace, operation, Route::Stateful(Arc::new(handler)))
    }

    /// Registers a bidirectional streaming handler.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Duplicate` if the pair is taken.
    pub fn register_stream<H: StreamHandler>(
        &mut self,
        namespace: &str,
        operation: &str,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        self.insert_new(namespace, operation, Route::Stream(Arc::new(handler)))
    }

    /// Installs `route`, returning the one it displaced. For deliberate
    /// overrides such as test doubles.
    pub fn replace(&mut self, namespace: &str, operation: &str, route: Route) -> Option<Route> {
        tracing::warn!(namespace, operation, kind = route.kind(), "replacing route");
        Arc::make_mut(&mut self.routes)
            .entry(namespace.to_string())
            .or_default()
            .insert(operation.to_string(), route)
    }

    fn insert_new(
        &mut self,
        namespace: &str,
        operation: &str,
        route: Route,
    ) -> Result<&mut Self, RegistrationError> {
        let ops = Arc::make_mut(&mut self.routes)
            .entry(namespace.to_string())
            .or_default();
        if ops.contains_key(operation) {
            return Err(RegistrationError::Duplicate {
                namespace: namespace.to_string(),
                operation: operation.to_string(),
            });
        }
        tracing::debug!(namespace, operation, kind = route.kind(), "registered route");
        ops.insert(operation.to_string(), route);
        Ok(self)
    }

    #[must_use]
    pub fn route(&self, receiver: &Receiver) -> Option<&Route> {
        self.routes
            .get(receiver.namespace())?
            .get(receiver.operation())
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("routes", &self.len()).finish()
    }
}

impl Service<Invocation> for Router {
    type Response = Bytes;
    type Error = InvocationError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, inv: Invocation) -> Self::Future {
        let Invocation { ctx, payload } = inv;
        match self.route(&ctx.receiver).cloned() {
            Some(Route::Unary(handler)) => Box::pin(async move {
                handler.call(ctx, payload).await.map_err(InvocationError::from)
            }),
            Some(Route::Stateful(handler)) => {
                let Some(entity_id) = ctx.receiver.entity_id().map(str::to_string) else {
                    let receiver = ctx.receiver.to_string();
                    return Box::pin(async move { Err(InvocationError::MissingEntityId { receiver }) });
                };
                Box::pin(async move {
                    handler
                        .call(&entity_id, ctx, payload)
                        .await
                        .map_err(InvocationError::from)
                })
            }
            Some(Route::Stream(_)) => {
                let receiver = ctx.receiver.to_string();
                Box::pin(async move { Err(InvocationError::StreamOnly { receiver }) })
            }
            None => {
                let receiver = ctx.receiver.to_string();
                Box::pin(async move { Err(InvocationError::UnknownOperation { receiver }) })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
