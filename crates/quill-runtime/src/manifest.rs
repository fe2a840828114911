//! Plugin manifest parsing.
//!
//! A plugin directory may carry a `manifest.toml` next to its entry script
//! describing the plugin. The file is optional; a plugin without one is
//! enabled and unversioned.

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Manifest file name inside a plugin directory.
pub const MANIFEST_FILE: &str = "manifest.toml";

/// Plugin manifest structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PluginManifest {
    /// Plugin metadata.
    #[serde(default)]
    pub plugin: PluginMetadata,
}

/// Plugin metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginMetadata {
    /// Version string (semver).
    #[serde(default)]
    pub version: Option<String>,

    /// Plugin description.
    #[serde(default)]
    pub description: Option<String>,

    /// Plugin author(s).
    #[serde(default)]
    pub authors: Vec<String>,

    /// Whether the plugin should be loaded.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for PluginMetadata {
    fn default() -> Self {
        Self {
            version: None,
            description: None,
            authors: Vec::new(),
            enabled: true,
        }
    }
}

impl PluginManifest {
    /// Load a manifest from a TOML file.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| RuntimeError::InvalidManifest(format!("{}: {}", path.display(), e)))
    }

    /// Load the manifest of a plugin directory, or the default if it has none.
    pub fn from_dir(dir: &Path) -> RuntimeResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse a manifest from a TOML string.
    pub fn parse(content: &str) -> RuntimeResult<Self> {
        let manifest: PluginManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> RuntimeResult<()> {
        if let Some(version) = &self.plugin.version {
            if version.trim().is_empty() {
                return Err(RuntimeError::InvalidManifest(
                    "Plugin version cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether the plugin should be loaded.
    pub fn is_enabled(&self) -> bool {
        self.plugin.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let toml = r#"
[plugin]
version = "1.2.0"
description = "Blog routes"
authors = ["someone"]
"#;

        let manifest = PluginManifest::parse(toml).unwrap();
        assert_eq!(manifest.plugin.version.as_deref(), Some("1.2.0"));
        assert_eq!(manifest.plugin.description.as_deref(), Some("Blog routes"));
        assert!(manifest.is_enabled());
    }

    #[test]
    fn test_disabled_manifest() {
        let manifest = PluginManifest::parse("[plugin]\nenabled = false\n").unwrap();
        assert!(!manifest.is_enabled());
    }

    #[test]
    fn test_empty_manifest_is_default() {
        assert_eq!(PluginManifest::parse("").unwrap(), PluginManifest::default());
    }

    #[test]
    fn test_invalid_manifest() {
        assert!(PluginManifest::parse("[plugin]\nversion = \"\"\n").is_err());
        assert!(PluginManifest::parse("[plugin]\nenabled = \"yes\"\n").is_err());
    }

    #[test]
    fn test_missing_manifest_file_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let manifest = PluginManifest::from_dir(dir.path()).unwrap();
        assert!(manifest.is_enabled());
    }
}
