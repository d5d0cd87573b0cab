//! Tower middleware layers for the invocation pipeline.
//!
//! - [`timeout`]: per-invocation deadline and cancellation
//! - [`metrics`]: tracing span plus `metrics` counters and latency histogram
//! - [`load_shed`]: admission budget shared with streams
//! - [`retry`]: exponential-backoff retries of retryable failures
//! - [`breaker`]: per-namespace circuit breaker
//! - [`pipeline`]: composes the layers around a router

pub mod breaker;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod timeout;

pub use breaker::{CircuitBreakerLayer, CircuitState};
pub use load_shed::{Admission, AdmissionSlot, LoadShedLayer};
pub use metrics::MetricsLayer;
pub use pipeline::{build_invocation_pipeline, InvocationService};
pub use retry::RetryPolicy;
pub use timeout::TimeoutLayer;
