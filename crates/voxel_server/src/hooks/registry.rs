//! Registered plugins, in registration order.

use super::Plugin;
use crate::error::PluginError;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Result of [`PluginRegistry::reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// No plugin with that name was registered; it was added
    Registered,
    /// The old instance was stopped and replaced
    Replaced,
    /// Same version already registered; nothing changed
    Unchanged,
}

/// Holds plugin instances.
///
/// Dispatch takes a snapshot of the list, so plugins can be swapped while a
/// hook is running without either side blocking for long.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").finish_non_exhaustive()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with `plugins`, in order. Later duplicates
    /// of a name are dropped.
    pub fn with_plugins(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut unique: Vec<Arc<dyn Plugin>> = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            if unique.iter().all(|p| p.name() != plugin.name()) {
                unique.push(plugin);
            }
        }
        Self {
            plugins: RwLock::new(unique),
        }
    }

    /// Adds a plugin. Names must be unique.
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let mut plugins = self.plugins.write().await;
        if plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(PluginError::InitializationFailed(format!(
                "plugin {} is already registered",
                plugin.name()
            )));
        }
        info!("🔌 Registered plugin {} v{}", plugin.name(), plugin.version());
        plugins.push(plugin);
        Ok(())
    }

    /// Replaces the plugin with the same name if its version differs.
    ///
    /// The old instance is told to stop before the new one takes its slot;
    /// registration order is kept.
    pub async fn reload(&self, plugin: Arc<dyn Plugin>) -> Result<ReloadOutcome, PluginError> {
        let current = self.get(plugin.name()).await;
        let Some(current) = current else {
            self.register(plugin).await?;
            return Ok(ReloadOutcome::Registered);
        };

        if current.version() == plugin.version() {
            info!(
                "Plugin {} v{} is already loaded, skipping reload",
                plugin.name(),
                plugin.version()
            );
            return Ok(ReloadOutcome::Unchanged);
        }

        if let Err(e) = current.on_stop().await {
            error!("Error stopping plugin {}: {}", current.name(), e);
        }

        let mut plugins = self.plugins.write().await;
        match plugins.iter_mut().find(|p| p.name() == plugin.name()) {
            Some(slot) => {
                info!(
                    "🔄 Reloaded plugin {} v{} -> v{}",
                    plugin.name(),
                    current.version(),
                    plugin.version()
                );
                *slot = plugin;
            }
            None => plugins.push(plugin),
        }
        Ok(ReloadOutcome::Replaced)
    }

    /// Removes a plugin, stopping it first.
    pub async fn unregister(&self, name: &str) -> Result<(), PluginError> {
        let removed = {
            let mut plugins = self.plugins.write().await;
            let index = plugins
                .iter()
                .position(|p| p.name() == name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            plugins.remove(index)
        };

        info!("Unloading plugin: {}", name);
        if let Err(e) = removed.on_stop().await {
            error!("Error shutting down plugin {}: {}", name, e);
        }
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .await
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// The current plugin list, in registration order.
    pub async fn snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.read().await.clone()
    }

    /// Empties the registry and returns what it held.
    pub async fn drain(&self) -> Vec<Arc<dyn Plugin>> {
        std::mem::take(&mut *self.plugins.write().await)
    }

    pub async fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }
}
