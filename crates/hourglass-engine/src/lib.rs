//! Hourglass Engine - command cooldown engine
//!
//! This crate provides:
//! - Plugin traits and lifecycle management
//! - Cooldown gate: rule resolution, cooldown tracking, bypass and persistence

use async_trait::async_trait;

pub mod cooldown;

pub use cooldown::{
    ActionKey, ActorId, AllowReason, BypassRegistry, BypassState, CooldownConfig, CooldownGate,
    CooldownGroup, CooldownPlugin, CooldownStore, CooldownTable, DataFormat, EngineSettings,
    FileCooldownStore, GateDecision, GateRequest, GateStats, GroupConfig, LoadReport,
    MemoryCooldownStore, NoPermissions, PermissionCheck, PersistenceCodec, RawDuration, RuleInfo,
    RulePage, RuleSet, RuleStore, StaticPermissions, TableSnapshot, create_cooldown_store,
    start_prune_task,
};

/// Plugin trait for extensibility
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Get the plugin name
    fn name(&self) -> &str;

    /// Initialize the plugin
    async fn init(&self) -> anyhow::Result<()>;

    /// Shutdown the plugin
    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Registry that starts plugins in order and stops them in reverse
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Initialize all plugins, stopping at the first failure
    pub async fn init_all(&self) -> anyhow::Result<()> {
        for plugin in &self.plugins {
            plugin.init().await?;
            tracing::info!("Plugin '{}' initialized", plugin.name());
        }
        Ok(())
    }

    /// Shutdown all plugins; every plugin is attempted and the first error returned
    pub async fn shutdown_all(&self) -> anyhow::Result<()> {
        let mut first_error = None;
        for plugin in self.plugins.iter().rev() {
            match plugin.shutdown().await {
                Ok(()) => tracing::info!("Plugin '{}' shutdown", plugin.name()),
                Err(e) => {
                    tracing::error!("Plugin '{}' failed to shut down: {}", plugin.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.plugins
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
        fail_shutdown: bool,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn init(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("init {}", self.name));
            Ok(())
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("shutdown {}", self.name));
            if self.fail_shutdown {
                anyhow::bail!("{} refused", self.name);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_registry_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        for name in ["first", "second"] {
            registry.register(Box::new(Recorder {
                name,
                log: log.clone(),
                fail_shutdown: false,
            }));
        }

        registry.init_all().await.unwrap();
        registry.shutdown_all().await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["init first", "init second", "shutdown second", "shutdown first"]
        );
        assert_eq!(registry.list(), vec!["first", "second"]);
        assert!(registry.get("second").is_some());
        assert!(registry.get("third").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_continues_after_failure() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(Recorder {
            name: "first",
            log: log.clone(),
            fail_shutdown: false,
        }));
        registry.register(Box::new(Recorder {
            name: "second",
            log: log.clone(),
            fail_shutdown: true,
        }));

        assert!(registry.shutdown_all().await.is_err());
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_registry_default_is_empty() {
        assert!(PluginRegistry::default().list().is_empty());
    }
}
