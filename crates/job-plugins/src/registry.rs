//! Name-keyed table of plugin constructors.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PluginError;
use crate::plugin::{JobPlugin, PluginClientset};
use crate::ssh;

/// Builds a plugin from its clientset and raw argument list.
pub type PluginBuilder =
    fn(PluginClientset, &[String]) -> Result<Arc<dyn JobPlugin>, PluginError>;

/// Registry of plugin constructors.
///
/// Populated once at startup and shared read-only afterwards; the registry
/// never interprets plugin arguments.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    builders: BTreeMap<String, PluginBuilder>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in plugin.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ssh::PLUGIN_NAME, ssh::SshPlugin::build);
        registry
    }

    /// Registers `builder` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, builder: PluginBuilder) {
        self.builders.insert(name.into(), builder);
    }

    /// Instantiates the plugin registered under `name`.
    pub fn build(
        &self,
        name: &str,
        clientset: PluginClientset,
        arguments: &[String],
    ) -> Result<Arc<dyn JobPlugin>, PluginError> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        builder(clientset, arguments)
    }

    /// Registered plugin names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
