//! Static plugin registry

use super::{DebugPlugin, EnvironmentPlugin, HookDispatcher, Plugin, WaitPlugin};
use indexmap::IndexMap;
use std::sync::Arc;

/// Constructor for a named plugin
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Maps plugin names used in launch files to constructors
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: IndexMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `debug`, `wait` and `environment`
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DebugPlugin::NAME, || Box::new(DebugPlugin));
        registry.register(WaitPlugin::NAME, || Box::new(WaitPlugin));
        registry.register(EnvironmentPlugin::NAME, || Box::new(EnvironmentPlugin));
        registry
    }

    /// Add or replace a plugin constructor
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate a plugin by name
    pub fn create(&self, name: &str) -> Result<Box<dyn Plugin>, PluginError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| PluginError::UnknownPlugin(name.to_string()))
    }

    /// Instantiate plugins in the given order
    pub fn dispatcher<S: AsRef<str>>(&self, names: &[S]) -> Result<HookDispatcher, PluginError> {
        let plugins = names
            .iter()
            .map(|name| self.create(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HookDispatcher::new(plugins))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Errors raised while setting up plugins
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Unknown plugin '{0}'")]
    UnknownPlugin(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_plugins() {
        let registry = PluginRegistry::builtin();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["debug", "wait", "environment"]
        );

        let dispatcher = registry.dispatcher(&["wait", "debug"]).unwrap();
        assert_eq!(dispatcher.names(), vec!["wait", "debug"]);
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::builtin();
        let err = registry.dispatcher(&["debug", "docker"]).unwrap_err();
        assert!(matches!(err, PluginError::UnknownPlugin(ref name) if name == "docker"));
        assert_eq!(err.to_string(), "Unknown plugin 'docker'");
    }

    #[test]
    fn test_register_custom_plugin() {
        struct Quiet;

        #[async_trait::async_trait]
        impl Plugin for Quiet {
            fn name(&self) -> &str {
                "quiet"
            }
        }

        let mut registry = PluginRegistry::new();
        assert!(!registry.contains("quiet"));

        registry.register("quiet", || Box::new(Quiet));
        assert!(registry.contains("quiet"));
        assert_eq!(registry.create("quiet").unwrap().name(), "quiet");
    }
}
