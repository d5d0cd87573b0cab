//! Graceful shutdown with in-flight invocation tracking.
//!
//! Health state lives in an `ArcSwap` so the dispatcher's admission check is
//! a lock-free load. In-flight invocations hold an RAII guard; the last guard
//! to drop during a drain wakes the waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Runtime health, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Plugins are initializing. Invocations are admitted.
    Starting,
    Ready,
    /// New invocations are rejected; in-flight ones run to completion.
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn accepts_invocations(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

/// Coordinates shutdown across the runtime.
///
/// 1. The dispatcher calls [`ShutdownController::admit`] per invocation
/// 2. [`ShutdownController::trigger_shutdown`] moves to `Draining` and
///    cancels [`ShutdownController::token`]
/// 3. [`ShutdownController::wait_for_drain`] waits for in-flight work
#[derive(Debug)]
pub struct ShutdownController {
    token: CancellationToken,
    in_flight: Arc<InFlight>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            in_flight: Arc::new(InFlight::default()),
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Token cancelled when shutdown begins. Long-running tasks (stream
    /// producers, pool replacements) select on a child of it.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Moves to `Draining` and cancels the shutdown token.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        self.token.cancel();
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Registers an in-flight invocation, or returns `None` once draining
    /// has started.
    #[must_use]
    pub fn admit(&self) -> Option<InFlightGuard> {
        if !self.health_state().accepts_invocations() {
            return None;
        }
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        Some(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits for all in-flight invocations to finish, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` on success; returns `false` and
    /// stays `Draining` if the timeout expires first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.in_flight.drained.notified();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.health_state.store(Arc::new(HealthState::Stopped));
        } else {
            tracing::warn!(
                in_flight = self.in_flight_count(),
                "drain timed out with invocations still running"
            );
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight invocation. Dropping it, including during
/// unwinding, releases the slot.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}
