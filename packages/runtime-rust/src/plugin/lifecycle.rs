use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RuntimeConfig;

/// Context handed to plugins during initialization.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    pub config: Arc<RuntimeConfig>,
}

/// A plugin with startup and shutdown hooks (compute pools, transports,
/// broker clients).
#[async_trait]
pub trait ManagedPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn init(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Runs plugin hooks in a deterministic order: init in registration order,
/// shutdown in reverse.
#[derive(Default)]
pub struct Lifecycle {
    plugins: Vec<Arc<dyn ManagedPlugin>>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn ManagedPlugin>) -> &mut Self {
        self.plugins.push(plugin);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Initializes every plugin in registration order, stopping at the first
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns the failing plugin's error, with its name as context.
    pub async fn init_all(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        for plugin in &self.plugins {
            tracing::debug!(plugin = plugin.name(), "initializing plugin");
            plugin
                .init(ctx)
                .await
                .map_err(|e| e.context(format!("initializing plugin {:?}", plugin.name())))?;
        }
        Ok(())
    }

    /// Shuts every plugin down in reverse registration order. A failure is
    /// logged and does not stop the remaining plugins.
    ///
    /// # Errors
    ///
    /// Returns the first failure after all plugins have been visited.
    pub async fn shutdown_all(&self) -> anyhow::Result<()> {
        let mut first_error = None;
        for plugin in self.plugins.iter().rev() {
            if let Err(e) = plugin.shutdown().await {
                tracing::error!(plugin = plugin.name(), error = %e, "plugin shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("Lifecycle").field("plugins", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    /// Records lifecycle calls into a shared log.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_shutdown: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail_shutdown: false,
            })
        }
    }

    #[async_trait]
    impl ManagedPlugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn init(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("init:{}", self.name));
            Ok(())
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("shutdown:{}", self.name));
            if self.fail_shutdown {
                anyhow::bail!("{} refused to stop", self.name);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn init_in_order_shutdown_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = Lifecycle::new();
        lifecycle
            .register(Recorder::new("first", &log))
            .register(Recorder::new("second", &log))
            .register(Recorder::new("third", &log));

        lifecycle.init_all(&PluginContext::default()).await.unwrap();
        lifecycle.shutdown_all().await.unwrap();

        assert_eq!(
            *log.lock(),
            [
                "init:first",
                "init:second",
                "init:third",
                "shutdown:third",
                "shutdown:second",
                "shutdown:first"
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = Lifecycle::new();
        lifecycle.register(Recorder::new("a", &log)).register(Arc::new(Recorder {
            name: "b",
            log: Arc::clone(&log),
            fail_shutdown: true,
        }));

        let err = lifecycle.shutdown_all().await.unwrap_err();
        assert!(err.to_string().contains("b refused"));
        assert_eq!(*log.lock(), ["shutdown:b", "shutdown:a"]);
    }
}
