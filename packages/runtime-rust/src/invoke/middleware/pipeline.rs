//! Composition of the middleware layers around a router.

use bytes::Bytes;
use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::breaker::CircuitBreakerLayer;
use super::load_shed::{Admission, LoadShedLayer};
use super::metrics::MetricsLayer;
use super::retry::RetryPolicy;
use super::timeout::TimeoutLayer;
use crate::config::RuntimeConfig;
use crate::invoke::invocation::{Invocation, InvocationError};
use crate::invoke::router::Router;

/// The composed, type-erased invocation service. Clone it per invocation.
pub type InvocationService = BoxCloneSyncService<Invocation, Bytes, InvocationError>;

/// Wraps the router with the middleware stack.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` - take an admission slot, before any other work
/// 2. `MetricsLayer` - span and measurements, so timeouts are counted too
/// 3. retry (when configured) - the whole invocation is measured once
/// 4. `CircuitBreakerLayer` (when configured) - every attempt is judged
/// 5. `TimeoutLayer` - deadline and cancellation around the handler
#[must_use]
pub fn build_invocation_pipeline(
    router: Router,
    config: &RuntimeConfig,
    admission: &Admission,
) -> InvocationService {
    let resiliency = &config.resiliency;
    let service = ServiceBuilder::new()
        .layer(LoadShedLayer::new(admission.clone()))
        .layer(MetricsLayer)
        .option_layer(resiliency.retry.clone().map(RetryPolicy::layer))
        .option_layer(resiliency.circuit_breaker.as_ref().map(CircuitBreakerLayer::new))
        .layer(TimeoutLayer::new(config.default_timeout()))
        .service(router);
    BoxCloneSyncService::new(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
