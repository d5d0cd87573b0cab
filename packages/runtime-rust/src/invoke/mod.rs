//! Invocation contract: addressing, handlers, routing, middleware, and the
//! dispatcher that ties them together.
//!
//! - [`Router`]: `(namespace, operation)` → handler, as a `tower::Service`
//! - [`middleware`]: admission, instrumentation, retries, circuit breaking, deadlines
//! - [`Dispatcher`]: admission-checked entry point implementing [`Invoker`]
//! - [`Exchange`]: transport-facing request/response adapter

pub mod dispatcher;
pub mod exchange;
pub mod handler;
pub mod invocation;
pub mod middleware;
pub mod router;

pub use dispatcher::{Dispatcher, Invoker};
pub use exchange::{Exchange, ExchangeRequest, ExchangeResponse};
pub use handler::{handler_fn, stateful_fn, stream_fn, Handler, StatefulHandler, StreamHandler};
pub use invocation::{Invocation, InvocationContext, InvocationError};
pub use router::{RegistrationError, Route, Router};
