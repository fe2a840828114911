//! Plugin discovery under a root directory.
//!
//! Each immediate subdirectory of the root that contains the entry script
//! is a plugin; the directory name is the plugin's identity:
//!
//! ```text
//! plugins/
//!   blog/
//!     index.js         <- entry script
//!     manifest.toml    <- optional metadata
//!   search/
//!     index.js
//! ```

use crate::error::{RuntimeError, RuntimeResult};
use crate::manifest::PluginManifest;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default entry script file name.
pub const DEFAULT_ENTRY: &str = "index.js";

/// Information about a discovered plugin.
#[derive(Debug, Clone)]
pub struct PluginPath {
    /// Plugin name (the directory name).
    pub name: String,

    /// Path to the plugin directory.
    pub path: PathBuf,

    /// Path to the entry script.
    pub entry: PathBuf,

    /// Parsed manifest, or the default when the plugin has none.
    pub manifest: PluginManifest,
}

impl PluginPath {
    /// Plugin version from the manifest.
    pub fn version(&self) -> Option<&str> {
        self.manifest.plugin.version.as_deref()
    }

    /// Plugin description from the manifest.
    pub fn description(&self) -> Option<&str> {
        self.manifest.plugin.description.as_deref()
    }
}

/// Discover enabled plugins under `root`, sorted by name.
///
/// A missing root yields no plugins. Directories without the entry script
/// are skipped; a malformed manifest is an error.
pub fn discover_plugins(root: &Path, entry: &str) -> RuntimeResult<Vec<PluginPath>> {
    if !root.exists() {
        debug!("Plugin directory {:?} does not exist", root);
        return Ok(Vec::new());
    }

    let mut plugins = Vec::new();
    for dir_entry in std::fs::read_dir(root)? {
        let path = dir_entry?.path();
        if !path.is_dir() {
            continue;
        }

        if !path.join(entry).is_file() {
            debug!("Skipping {:?}: no {}", path, entry);
            continue;
        }

        let plugin = discover_plugin(&path, entry)?;
        if !plugin.manifest.is_enabled() {
            info!("Skipping disabled plugin: {}", plugin.name);
            continue;
        }

        info!("Discovered plugin: {} at {:?}", plugin.name, plugin.path);
        plugins.push(plugin);
    }

    plugins.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(plugins)
}

/// Describe a single plugin directory.
pub fn discover_plugin(path: &Path, entry: &str) -> RuntimeResult<PluginPath> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RuntimeError::PluginNotFound(path.display().to_string()))?
        .to_string();

    let entry_path = path.join(entry);
    if !entry_path.is_file() {
        return Err(RuntimeError::PluginNotFound(entry_path.display().to_string()));
    }

    Ok(PluginPath {
        name,
        path: path.to_path_buf(),
        entry: entry_path,
        manifest: PluginManifest::from_dir(path)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_plugin(dir: &Path, name: &str, manifest: Option<&str>) {
        let plugin_dir = dir.join(name);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join(DEFAULT_ENTRY), "function Config() {}").unwrap();
        if let Some(manifest) = manifest {
            std::fs::write(plugin_dir.join("manifest.toml"), manifest).unwrap();
        }
    }

    #[test]
    fn test_discover_in_directory() {
        let temp_dir = TempDir::new().unwrap();
        create_test_plugin(temp_dir.path(), "plugin-b", None);
        create_test_plugin(temp_dir.path(), "plugin-a", Some("[plugin]\nversion = \"0.1.0\"\n"));

        let plugins = discover_plugins(temp_dir.path(), DEFAULT_ENTRY).unwrap();
        let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["plugin-a", "plugin-b"]);
        assert_eq!(plugins[0].version(), Some("0.1.0"));
        assert!(plugins[1].version().is_none());
    }

    #[test]
    fn test_skips_directories_without_entry() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("assets")).unwrap();
        std::fs::write(temp_dir.path().join("README.md"), "not a plugin").unwrap();
        create_test_plugin(temp_dir.path(), "real", None);

        let plugins = discover_plugins(temp_dir.path(), DEFAULT_ENTRY).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "real");
    }

    #[test]
    fn test_skips_disabled_plugins() {
        let temp_dir = TempDir::new().unwrap();
        create_test_plugin(temp_dir.path(), "off", Some("[plugin]\nenabled = false\n"));

        let plugins = discover_plugins(temp_dir.path(), DEFAULT_ENTRY).unwrap();
        assert!(plugins.is_empty());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let plugins = discover_plugins(&temp_dir.path().join("nope"), DEFAULT_ENTRY).unwrap();
        assert!(plugins.is_empty());
    }

    #[test]
    fn test_custom_entry_name() {
        let temp_dir = TempDir::new().unwrap();
        let plugin_dir = temp_dir.path().join("custom");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("main.js"), "").unwrap();

        assert_eq!(discover_plugins(temp_dir.path(), "main.js").unwrap().len(), 1);
        assert!(discover_plugins(temp_dir.path(), DEFAULT_ENTRY).unwrap().is_empty());
    }

    #[test]
    fn test_bad_manifest_is_error() {
        let temp_dir = TempDir::new().unwrap();
        create_test_plugin(temp_dir.path(), "broken", Some("[plugin\n"));
        assert!(discover_plugins(temp_dir.path(), DEFAULT_ENTRY).is_err());
    }
}
