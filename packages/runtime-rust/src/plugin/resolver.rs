use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Shared = Arc<dyn Any + Send + Sync>;

/// Errors from resolving dependencies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("dependency {name:?} is not available")]
    Missing { name: String },
    #[error("dependency {name:?} is not a {expected}")]
    WrongType { name: String, expected: &'static str },
}

// ---------------------------------------------------------------------------
// ResolverBuilder
// ---------------------------------------------------------------------------

/// Collects constructed singletons during startup.
#[derive(Default)]
pub struct ResolverBuilder {
    by_name: HashMap<String, Shared>,
    by_type: HashMap<TypeId, Shared>,
}

impl ResolverBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `value` resolvable under `name` and by its type. Store trait
    /// objects as `Arc<dyn Trait>` and resolve them with the same type.
    pub fn provide<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) -> &mut Self {
        let shared: Shared = Arc::new(value);
        self.by_type.insert(TypeId::of::<T>(), Arc::clone(&shared));
        self.by_name.insert(name.into(), shared);
        self
    }

    #[must_use]
    pub fn freeze(self) -> Resolver {
        Resolver {
            inner: Arc::new(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Read-only view of the constructed singletons. Cheap to clone.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverBuilder>,
}

impl Resolver {
    /// Looks up `name` and checks it holds a `T`. Never panics.
    #[must_use]
    pub fn resolve<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.try_resolve(name).ok()
    }

    /// Boolean form of [`Resolver::resolve`]: fills `target` on success.
    pub fn resolve_into<T: Any + Clone>(&self, name: &str, target: &mut Option<T>) -> bool {
        match self.resolve(name) {
            Some(value) => {
                *target = Some(value);
                true
            }
            None => false,
        }
    }

    /// Like [`Resolver::resolve`] but says why the lookup failed.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::Missing` or `ResolveError::WrongType`.
    pub fn try_resolve<T: Any + Clone>(&self, name: &str) -> Result<T, ResolveError> {
        let shared = self
            .inner
            .by_name
            .get(name)
            .ok_or_else(|| ResolveError::Missing {
                name: name.to_string(),
            })?;
        shared
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ResolveError::WrongType {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Looks up the most recently provided value of type `T`.
    #[must_use]
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.inner
            .by_type
            .get(&TypeId::of::<T>())
            .and_then(|shared| shared.downcast_ref::<T>())
            .cloned()
    }

    /// Starts a batch of name -> slot bindings that fails as a whole.
    #[must_use]
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            resolver: self,
            failed: None,
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.inner.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Resolver").field("names", &names).finish()
    }
}

/// Batch resolution. Binding stops at the first failure; slots bound before
/// it keep their values, so callers should abort on error.
#[derive(Debug)]
pub struct Batch<'r> {
    resolver: &'r Resolver,
    failed: Option<ResolveError>,
}

impl Batch<'_> {
    #[must_use]
    pub fn bind<T: Any + Clone>(mut self, name: &str, slot: &mut Option<T>) -> Self {
        if self.failed.is_none() {
            match self.resolver.try_resolve(name) {
                Ok(value) => *slot = Some(value),
                Err(e) => self.failed = Some(e),
            }
        }
        self
    }

    /// # Errors
    ///
    /// Returns the first failed lookup, naming the dependency.
    pub fn finish(self) -> Result<(), ResolveError> {
        self.failed.map_or(Ok(()), Err)
    }
}
