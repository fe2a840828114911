//! Plugin manager: discovery, compilation and the lifecycle passes.

use crate::plugin::{Facade, Plugin, PluginState};
use quill_runtime::{discover_plugins, Pool, RuntimeResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Manager for quill plugins.
///
/// Plugins are kept in discovery order (sorted by name), and both
/// lifecycle passes visit them in that order, one at a time.
pub struct Manager {
    pool: Arc<Pool>,
    plugins: Vec<Plugin>,
}

impl Manager {
    /// Create a manager without plugins.
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            pool,
            plugins: Vec::new(),
        }
    }

    /// Discover and compile every plugin under `root`.
    ///
    /// Fails on the first plugin that does not compile; no partial plugin
    /// set is returned.
    pub fn load(root: &Path, entry: &str, pool: Arc<Pool>) -> RuntimeResult<Self> {
        info!("Discovering plugins in {:?}", root);
        let mut manager = Self::new(pool);
        for plugin_path in discover_plugins(root, entry)? {
            let plugin = Plugin::load(&plugin_path, Arc::clone(&manager.pool))?;
            manager.plugins.push(plugin);
        }
        info!("Loaded {} plugin(s)", manager.plugins.len());
        Ok(manager)
    }

    /// Add an already compiled plugin after the existing ones.
    pub fn add(&mut self, plugin: Plugin) {
        self.plugins.push(plugin);
    }

    /// Pool plugin functions run in.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Run `Config` on every plugin, stopping at the first failure.
    pub fn config(&mut self, facade: &dyn Facade) -> RuntimeResult<()> {
        for plugin in &mut self.plugins {
            info!(plugin = %plugin.name(), "Configuring plugin");
            plugin.config(facade)?;
        }
        Ok(())
    }

    /// Run `Init` on every plugin, stopping at the first failure.
    pub fn init(&mut self, facade: &dyn Facade) -> RuntimeResult<()> {
        for plugin in &mut self.plugins {
            info!(plugin = %plugin.name(), "Initializing plugin");
            plugin.init(facade)?;
        }
        Ok(())
    }

    /// Look up a plugin by name.
    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    /// All plugins in lifecycle order.
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// Get the number of loaded plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// List all loaded plugins with their state.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .map(|p| PluginInfo {
                name: p.name().to_string(),
                path: p.path().map(Path::to_path_buf),
                version: p.manifest().plugin.version.clone(),
                description: p.manifest().plugin.description.clone(),
                state: p.state(),
            })
            .collect()
    }
}

/// Information about a loaded plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub state: PluginState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_runtime::{RuntimeError, DEFAULT_ENTRY};
    use tempfile::TempDir;

    fn write_plugin(root: &Path, name: &str, source: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DEFAULT_ENTRY), source).unwrap();
    }

    #[test]
    fn test_new_manager() {
        let manager = Manager::new(Arc::new(Pool::default()));
        assert_eq!(manager.plugin_count(), 0);
        assert!(manager.list_plugins().is_empty());
    }

    #[test]
    fn test_load_lists_in_name_order() {
        let temp_dir = TempDir::new().unwrap();
        write_plugin(temp_dir.path(), "zeta", "function Init() {}");
        write_plugin(temp_dir.path(), "alpha", "function Config() {}");

        let manager = Manager::load(temp_dir.path(), DEFAULT_ENTRY, Arc::new(Pool::default())).unwrap();
        let names: Vec<_> = manager.list_plugins().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(manager.get("alpha").unwrap().state(), PluginState::Loaded);
    }

    #[test]
    fn test_compile_failure_aborts_load() {
        let temp_dir = TempDir::new().unwrap();
        write_plugin(temp_dir.path(), "good", "function Init() {}");
        write_plugin(temp_dir.path(), "bad", "function Init( {");

        let err = Manager::load(temp_dir.path(), DEFAULT_ENTRY, Arc::new(Pool::default()))
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::CompileError { ref identity, .. } if identity == "bad"));
    }
}
