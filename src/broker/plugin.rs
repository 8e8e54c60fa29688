use std::sync::Arc;

use adaptor_plugin::{AdaptorPlugin, Capability};
use dashmap::DashMap;
use tracing::info;

/// Plugins known to the broker, keyed by capability and URI.
#[derive(Clone, Default)]
pub struct PluginManager {
    plugins: Arc<DashMap<(Capability, String), Arc<dyn AdaptorPlugin>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any plugin already registered under the
    /// same capability and URI.
    pub fn register(&self, plugin: Arc<dyn AdaptorPlugin>) -> Option<Arc<dyn AdaptorPlugin>> {
        let key = (plugin.capability(), plugin.uri().to_string());
        info!(capability = %key.0, uri = %key.1, "plugin registered");
        self.plugins.insert(key, plugin)
    }

    pub fn unregister(&self, capability: Capability, uri: &str) -> Option<Arc<dyn AdaptorPlugin>> {
        self.plugins
            .remove(&(capability, uri.to_string()))
            .map(|(_, plugin)| plugin)
    }

    pub fn get(&self, capability: Capability, uri: &str) -> Option<Arc<dyn AdaptorPlugin>> {
        self.plugins
            .get(&(capability, uri.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// All registered `(capability, uri)` pairs, sorted.
    pub fn list(&self) -> Vec<(Capability, String)> {
        let mut keys: Vec<_> = self.plugins.iter().map(|kv| kv.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
