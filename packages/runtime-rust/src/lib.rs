//! Switchyard runtime: invocation routing, pooled compute, bidirectional
//! streams, and plugin lifecycle on top of `switchyard-core`.

pub mod compute;
pub mod config;
pub mod flow;
pub mod invoke;
pub mod plugin;
pub mod shutdown;
pub mod stream;
pub mod telemetry;

pub use compute::{CheckoutError, ComputeHandler, ComputeInstance, ComputeModule, ComputePool};
pub use config::{CircuitBreakerConfig, PoolConfig, ResiliencyConfig, RetryConfig, RuntimeConfig};
pub use flow::{Flow, Pipeline, PipelineHandler, Step};
pub use invoke::{Dispatcher, Exchange, Invocation, InvocationContext, InvocationError, Invoker, Router};
pub use plugin::{Lifecycle, ManagedPlugin, PluginRegistry, RegistryBuilder, Resolver};
pub use shutdown::{HealthState, ShutdownController};
pub use stream::{StreamChannel, StreamError};
