//! Logging setup.
//!
//! The runtime only emits `tracing` events and `metrics` measurements; the
//! host process decides where they go. [`init_tracing`] is a convenience for
//! hosts without their own subscriber.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Counter of completed invocations, labelled by `outcome`.
pub const INVOCATIONS_TOTAL: &str = "switchyard_invocations_total";
/// Histogram of invocation latency in milliseconds.
pub const INVOCATION_DURATION_MS: &str = "switchyard_invocation_duration_ms";
/// Counter of invocations refused for lack of admission slots, labelled by
/// `namespace`.
pub const INVOCATIONS_SHED_TOTAL: &str = "switchyard_invocations_shed_total";
/// Counter of retried attempts, labelled by `namespace`.
pub const INVOCATION_RETRIES_TOTAL: &str = "switchyard_invocation_retries_total";
/// Counter of circuit state changes, labelled by `namespace` and `state`.
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "switchyard_circuit_transitions_total";
/// Gauge of compute instances currently borrowed.
pub const POOL_BORROWED: &str = "switchyard_pool_borrowed";

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs a global subscriber filtered by `RUST_LOG` (default `info`).
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
    }
}
