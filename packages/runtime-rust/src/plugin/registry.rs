use std::collections::HashMap;
use std::fmt;

use switchyard_core::Value;

use super::resolver::Resolver;

/// Plugin constructor: receives the plugin's raw config (if any) and the
/// resolver holding everything constructed before it.
pub type Loader<T> = Box<dyn Fn(Option<&Value>, &Resolver) -> anyhow::Result<T> + Send + Sync>;

/// Errors from loading a plugin by name.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("no plugin registered under {name:?}")]
    NotRegistered { name: String },
    #[error("plugin {name:?} failed to load: {source}")]
    Load {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

// ---------------------------------------------------------------------------
// RegistryBuilder
// ---------------------------------------------------------------------------

/// Mutable registry used during startup. Call [`RegistryBuilder::freeze`]
/// before any concurrent use.
pub struct RegistryBuilder<T> {
    loaders: HashMap<String, Loader<T>>,
}

impl<T> RegistryBuilder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Registers a loader. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, loader: F) -> &mut Self
    where
        F: Fn(Option<&Value>, &Resolver) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.loaders.contains_key(&name) {
            tracing::warn!(plugin = %name, "overwriting registered plugin loader");
        }
        self.loaders.insert(name, Box::new(loader));
        self
    }

    #[must_use]
    pub fn freeze(self) -> PluginRegistry<T> {
        PluginRegistry {
            loaders: self.loaders,
        }
    }
}

impl<T> Default for RegistryBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// PluginRegistry
// ---------------------------------------------------------------------------

/// Read-only name -> loader map.
pub struct PluginRegistry<T> {
    loaders: HashMap<String, Loader<T>>,
}

impl<T> PluginRegistry<T> {
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Runs the loader registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::NotRegistered` for unknown names and
    /// `PluginError::Load` when the loader fails.
    pub fn load(
        &self,
        name: &str,
        config: Option<&Value>,
        resolver: &Resolver,
    ) -> Result<T, PluginError> {
        let loader = self
            .loaders
            .get(name)
            .ok_or_else(|| PluginError::NotRegistered {
                name: name.to_string(),
            })?;
        tracing::debug!(plugin = name, "loading plugin");
        loader(config, resolver).map_err(|source| PluginError::Load {
            name: name.to_string(),
            source,
        })
    }
}

impl<T> fmt::Debug for PluginRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config;
    use crate::plugin::ResolverBuilder;

    trait Greeter: Send + Sync + std::fmt::Debug {
        fn greet(&self) -> String;
    }

    #[derive(Default, serde::Deserialize)]
    #[serde(default)]
    struct GreeterConfig {
        greeting: String,
    }

    #[derive(Debug)]
    struct Fixed(String);

    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.0.clone()
        }
    }

    fn registry() -> PluginRegistry<Arc<dyn Greeter>> {
        let mut builder = RegistryBuilder::new();
        builder.register("fixed", |config, _resolver| {
            let cfg: GreeterConfig = config::decode(config)?;
            Ok(Arc::new(Fixed(cfg.greeting)) as Arc<dyn Greeter>)
        });
        builder.register("needs-prefix", |_config, resolver| {
            let prefix: String = resolver
                .resolve("prefix")
                .ok_or_else(|| anyhow::anyhow!("prefix not provided"))?;
            Ok(Arc::new(Fixed(prefix)) as Arc<dyn Greeter>)
        });
        builder.freeze()
    }

    #[test]
    fn loads_with_config() {
        let reg = registry();
        let config = Value::from(serde_json::json!({"greeting": "hello"}));
        let greeter = reg
            .load("fixed", Some(&config), &ResolverBuilder::new().freeze())
            .unwrap();
        assert_eq!(greeter.greet(), "hello");
        assert_eq!(reg.names(), ["fixed", "needs-prefix"]);
    }

    #[test]
    fn unknown_and_failing_loaders() {
        let reg = registry();
        let resolver = ResolverBuilder::new().freeze();
        assert!(matches!(
            reg.load("nope", None, &resolver),
            Err(PluginError::NotRegistered { .. })
        ));
        let err = reg.load("needs-prefix", None, &resolver).unwrap_err();
        assert!(matches!(err, PluginError::Load { .. }));
        assert!(err.to_string().contains("prefix not provided"));
    }

    #[test]
    fn overwrite_keeps_last_loader() {
        let mut builder: RegistryBuilder<u32> = RegistryBuilder::new();
        builder.register("n", |_, _| Ok(1)).register("n", |_, _| Ok(2));
        let reg = builder.freeze();
        assert_eq!(reg.load("n", None, &ResolverBuilder::new().freeze()).unwrap(), 2);
    }
}
