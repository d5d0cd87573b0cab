//! Per-namespace circuit breaker.
//!
//! A namespace whose invocations keep failing with server-side errors is cut
//! off for a cool-down: calls fail fast with `InvocationError::CircuitOpen`
//! without reaching the handler. Once the cool-down passes a limited number
//! of trial calls go through. Enough consecutive trial successes close the
//! circuit again; a trial failure reopens it.
//!
//! Client-side failures (bad arguments, missing routes, cancellation) never
//! count against a circuit.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use switchyard_core::ErrCode;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::invoke::invocation::{Invocation, InvocationError};
use crate::telemetry::CIRCUIT_TRANSITIONS_TOTAL;

/// Externally visible state of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Whether a failure says something about the namespace's health.
fn is_fault(err: &InvocationError) -> bool {
    !matches!(err, InvocationError::CircuitOpen { .. })
        && matches!(
            err.code(),
            ErrCode::Unknown
                | ErrCode::Internal
                | ErrCode::DataLoss
                | ErrCode::Unavailable
                | ErrCode::DeadlineExceeded
        )
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    failure_threshold: u32,
    open_timeout: Duration,
    half_open_max_calls: u32,
}

impl From<&CircuitBreakerConfig> for Settings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: config.open_timeout(),
            half_open_max_calls: config.half_open_max_calls.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { in_flight: u32, successes: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// The caller dropped the call before it finished.
    Abandoned,
}

/// State machine for one namespace. Every transition bumps `generation`, so
/// results of calls admitted under an earlier phase are ignored.
#[derive(Debug)]
struct Circuit {
    phase: Phase,
    generation: u64,
}

impl Circuit {
    fn new() -> Self {
        Self {
            phase: Phase::Closed { failures: 0 },
            generation: 0,
        }
    }

    fn state(&self, now: Instant) -> CircuitState {
        match self.phase {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { until } if now < until => CircuitState::Open,
            Phase::Open { .. } | Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn enter(&mut self, phase: Phase, namespace: &str, now: Instant) {
        self.phase = phase;
        self.generation += 1;
        let state = self.state(now);
        match state {
            CircuitState::Open => warn!(namespace, "circuit opened"),
            CircuitState::HalfOpen => info!(namespace, "circuit half-open; allowing trial calls"),
            CircuitState::Closed => info!(namespace, "circuit closed"),
        }
        metrics::counter!(
            CIRCUIT_TRANSITIONS_TOTAL,
            "namespace" => namespace.to_string(),
            "state" => state.as_str()
        )
        .increment(1);
    }

    /// Admits a call, returning the generation it runs under.
    fn admit(&mut self, settings: &Settings, namespace: &str, now: Instant) -> Option<u64> {
        if let Phase::Open { until } = self.phase {
            if now < until {
                return None;
            }
            self.enter(
                Phase::HalfOpen {
                    in_flight: 0,
                    successes: 0,
                },
                namespace,
                now,
            );
        }
        if let Phase::HalfOpen { in_flight, .. } = &mut self.phase {
            if *in_flight >= settings.half_open_max_calls {
                return None;
            }
            *in_flight += 1;
        }
        Some(self.generation)
    }

    fn record(&mut self, generation: u64, outcome: Outcome, settings: &Settings, namespace: &str, now: Instant) {
        if generation != self.generation {
            return;
        }
        let reopen = Phase::Open {
            until: now + settings.open_timeout,
        };
        let next = match (&mut self.phase, outcome) {
            (Phase::Closed { failures }, Outcome::Success) => {
                *failures = 0;
                None
            }
            (Phase::Closed { failures }, Outcome::Failure) => {
                *failures += 1;
                (*failures >= settings.failure_threshold).then_some(reopen)
            }
            (Phase::HalfOpen { in_flight, successes }, Outcome::Success) => {
                *in_flight = in_flight.saturating_sub(1);
                *successes += 1;
                (*successes >= settings.half_open_max_calls).then_some(Phase::Closed { failures: 0 })
            }
            (Phase::HalfOpen { .. }, Outcome::Failure) => Some(reopen),
            (Phase::HalfOpen { in_flight, .. }, Outcome::Abandoned) => {
                *in_flight = in_flight.saturating_sub(1);
                None
            }
            (Phase::Closed { .. } | Phase::Open { .. }, _) => None,
        };
        if let Some(phase) = next {
            self.enter(phase, namespace, now);
        }
    }
}

type Circuits = Arc<Mutex<HashMap<String, Circuit>>>;

// ---------------------------------------------------------------------------
// CircuitBreakerLayer
// ---------------------------------------------------------------------------

/// Tower layer keeping one circuit per receiver namespace. Services from one
/// layer, and their clones, share the circuits.
#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    settings: Settings,
    circuits: Circuits,
}

impl CircuitBreakerLayer {
    #[must_use]
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            settings: Settings::from(config),
            circuits: Arc::default(),
        }
    }

    /// Current state of `namespace`'s circuit; `Closed` if it has seen no
    /// calls.
    #[must_use]
    pub fn state(&self, namespace: &str) -> CircuitState {
        self.circuits
            .lock()
            .get(namespace)
            .map_or(CircuitState::Closed, |c| c.state(Instant::now()))
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            settings: self.settings,
            circuits: Arc::clone(&self.circuits),
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    settings: Settings,
    circuits: Circuits,
}

/// Reports a call's outcome when dropped, so an abandoned trial call frees
/// its half-open slot.
struct Trial {
    circuits: Circuits,
    namespace: String,
    generation: u64,
    settings: Settings,
    outcome: Outcome,
}

impl Drop for Trial {
    fn drop(&mut self) {
        if let Some(circuit) = self.circuits.lock().get_mut(&self.namespace) {
            circuit.record(
                self.generation,
                self.outcome,
                &self.settings,
                &self.namespace,
                Instant::now(),
            );
        }
    }
}

impl<S> Service<Invocation> for CircuitBreakerService<S>
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
        let namespace = inv.ctx.receiver.namespace().to_string();
        let admitted = self
            .circuits
            .lock()
            .entry(namespace.clone())
            .or_insert_with(Circuit::new)
            .admit(&self.settings, &namespace, Instant::now());
        let Some(generation) = admitted else {
            debug!(receiver = %inv.ctx.receiver, call_id = inv.ctx.call_id, "circuit open; refusing invocation");
            return Box::pin(async move { Err(InvocationError::CircuitOpen { namespace }) });
        };

        let mut trial = Trial {
            circuits: Arc::clone(&self.circuits),
            namespace,
            generation,
            settings: self.settings,
            outcome: Outcome::Abandoned,
        };
        let fut = self.inner.call(inv);
        Box::pin(async move {
            let result = fut.await;
            trial.outcome = match &result {
                Err(e) if is_fault(e) => Outcome::Failure,
                _ => Outcome::Success,
            };
            drop(trial);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
