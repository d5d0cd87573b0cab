//! Runtime configuration and plugin config decoding.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use switchyard_core::codec::CONTENT_TYPE_JSON;
use switchyard_core::{ErrorExposure, Value, ValueError};

/// Runtime-level configuration.
///
/// Controls invocation timeouts, admission limits, payload defaults, and the
/// compute pool. Every field has a default, so a partial document
/// deserializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identifier of this runtime instance, used in logs.
    pub node_id: String,
    /// Invocation deadline applied when the caller sets none.
    pub default_timeout_ms: u64,
    /// Maximum concurrent invocations before load shedding.
    pub max_concurrent_invocations: u32,
    /// Codec used when a request carries no content type.
    pub default_content_type: String,
    /// Frames buffered per stream direction, and items per push source.
    pub stream_queue_capacity: usize,
    /// Whether error metadata reaches callers. Off by default.
    pub expose_error_metadata: bool,
    pub pool: PoolConfig,
    /// How long shutdown waits for in-flight invocations.
    pub drain_timeout_ms: u64,
    /// Retry and circuit breaking for unary invocations. Both off by default.
    pub resiliency: ResiliencyConfig,
}

impl RuntimeConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    #[must_use]
    pub fn error_exposure(&self) -> ErrorExposure {
        if self.expose_error_metadata {
            ErrorExposure::Debug
        } else {
            ErrorExposure::Public
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_timeout_ms: 30_000,
            max_concurrent_invocations: 1000,
            default_content_type: CONTENT_TYPE_JSON.to_string(),
            stream_queue_capacity: 100,
            expose_error_metadata: false,
            pool: PoolConfig::default(),
            drain_timeout_ms: 10_000,
            resiliency: ResiliencyConfig::default(),
        }
    }
}

/// Compute pool sizing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of instances. `None` means twice the available parallelism.
    pub size: Option<usize>,
    /// Upper bound on waiting for an idle instance. `None` waits until the
    /// caller cancels.
    pub checkout_timeout_ms: Option<u64>,
}

impl PoolConfig {
    /// Effective pool size, never zero.
    #[must_use]
    pub fn effective_size(&self) -> usize {
        self.size.unwrap_or_else(default_pool_size).max(1)
    }

    #[must_use]
    pub fn checkout_timeout(&self) -> Option<Duration> {
        self.checkout_timeout_ms.map(Duration::from_millis)
    }
}

/// Failure handling around unary invocations. A missing section disables
/// that policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResiliencyConfig {
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

/// Retries with exponential backoff. Only retryable codes are retried, and
/// never once the invocation's token has fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive backoffs. Values below 1 are
    /// treated as 1.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (zero-based), capped at
    /// `max_backoff_ms`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(i32::try_from(retry).unwrap_or(i32::MAX));
        let millis = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(millis.round() as u64)
    }
}

/// Per-namespace circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive server-side failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit refuses calls before allowing trials.
    pub open_timeout_ms: u64,
    /// Concurrent trial calls while half-open; this many consecutive
    /// successes close the circuit.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 60_000,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get) * 2
}

/// Decodes a plugin's config payload into a typed struct. An absent payload
/// yields `T::default()`; fields missing from a present payload are filled
/// by `T`'s own serde defaults.
///
/// # Errors
///
/// Returns `ValueError` when the payload does not match `T`.
pub fn decode<T: DeserializeOwned + Default>(config: Option<&Value>) -> Result<T, ValueError> {
    match config {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => value.deserialize_into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_content_type, "application/json");
        assert_eq!(config.stream_queue_capacity, 100);
        assert_eq!(config.error_exposure(), ErrorExposure::Public);
        assert!(config.pool.effective_size() >= 2);
        assert_eq!(config.pool.checkout_timeout(), None);
        assert!(config.resiliency.retry.is_none());
        assert!(config.resiliency.circuit_breaker.is_none());
    }

    #[test]
    fn retry_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 3.0,
        };
        let delays: Vec<_> = (0..4).map(|n| retry.backoff(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 300, 900, 1_000]);

        let flat = RetryConfig {
            multiplier: 0.5,
            ..retry
        };
        assert_eq!(flat.backoff(3), Duration::from_millis(100));
    }

    #[test]
    fn resiliency_sections_enable_policies() {
        let config: RuntimeConfig = serde_json::from_value(serde_json::json!({
            "resiliency": {
                "retry": {"max_retries": 2},
                "circuit_breaker": {"failure_threshold": 3}
            }
        }))
        .unwrap();
        let retry = config.resiliency.retry.unwrap();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.initial_backoff_ms, 100);
        let breaker = config.resiliency.circuit_breaker.unwrap();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.open_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config: RuntimeConfig = serde_json::from_value(serde_json::json!({
            "node_id": "edge-1",
            "pool": {"size": 4, "checkout_timeout_ms": 250}
        }))
        .unwrap();
        assert_eq!(config.node_id, "edge-1");
        assert_eq!(config.pool.effective_size(), 4);
        assert_eq!(config.pool.checkout_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.max_concurrent_invocations, 1000);
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct BrokerConfig {
        url: String,
        retries: u32,
    }

    #[test]
    fn decode_plugin_config() {
        assert_eq!(decode::<BrokerConfig>(None).unwrap(), BrokerConfig::default());

        let raw = Value::from(serde_json::json!({"url": "nats://localhost"}));
        let cfg: BrokerConfig = decode(Some(&raw)).unwrap();
        assert_eq!(cfg.url, "nats://localhost");
        assert_eq!(cfg.retries, 0);

        let bad = Value::from(serde_json::json!({"retries": "many"}));
        assert!(decode::<BrokerConfig>(Some(&bad)).is_err());
    }
}
