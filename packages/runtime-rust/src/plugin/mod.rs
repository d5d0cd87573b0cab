//! Plugin construction and dependency resolution.
//!
//! - [`RegistryBuilder`] / [`PluginRegistry`]: name -> loader map, frozen
//!   after startup
//! - [`ResolverBuilder`] / [`Resolver`]: constructed singletons looked up by
//!   name or by type
//! - [`Lifecycle`]: init/shutdown sequencing for [`ManagedPlugin`]s

pub mod lifecycle;
pub mod registry;
pub mod resolver;

pub use lifecycle::{Lifecycle, ManagedPlugin, PluginContext};
pub use registry::{Loader, PluginError, PluginRegistry, RegistryBuilder};
pub use resolver::{Batch, ResolveError, Resolver, ResolverBuilder};
