//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/quill/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.
//!
//! The loaded record is also what plugins patch through `config.Set(...)`
//! during the `Config` phase, so every field has a serialized name that
//! guest code can address.

use anyhow::{Context, Result};
use quill_runtime::pool::{DEFAULT_MAX_IDLE, DEFAULT_MAX_STACK_SIZE, DEFAULT_MEMORY_LIMIT};
use quill_runtime::{PoolConfig, DEFAULT_ENTRY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Host process settings
    pub host: HostSection,
    /// Plugin discovery
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Execution context pool tuning
    #[serde(default)]
    pub pool: PoolSection,
    /// Free-form settings shared with plugins
    #[serde(default)]
    pub settings: toml::Table,
}

/// Host process settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// Display name of this host
    /// Default: "quill"
    pub name: String,
    /// Bind address for the request listener
    /// Default: "127.0.0.1:4040"
    pub bind_address: String,
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
}

/// Plugin discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginsConfig {
    /// Directory holding one sub-directory per plugin
    /// If None, uses XDG_DATA_HOME/quill/plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Entry script inside each plugin directory
    /// Default: "index.js"
    pub entry: String,
}

/// Execution context pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolSection {
    /// Idle contexts kept per sub-pool
    /// Default: 8
    pub max_idle: usize,
    /// Memory limit per interpreter in bytes, 0 for unlimited
    /// Default: 64 MiB
    pub memory_limit: usize,
    /// Stack size per interpreter in bytes, 0 for the engine default
    /// Default: 1 MiB
    pub max_stack_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: HostSection::default(),
            plugins: PluginsConfig::default(),
            pool: PoolSection::default(),
            settings: toml::Table::new(),
        }
    }
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            name: "quill".to_string(),
            bind_address: "127.0.0.1:4040".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            entry: DEFAULT_ENTRY.to_string(),
        }
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
        }
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl HostConfig {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/quill/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    pub fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Validate the configuration
    ///
    /// Runs after loading and again after every plugin patch.
    pub fn validate(&self) -> Result<()> {
        self.host
            .bind_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid bind_address: {}", self.host.bind_address))?;

        if !VALID_LOG_LEVELS.contains(&self.host.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.host.log_level,
                VALID_LOG_LEVELS.join(", ")
            );
        }

        if self.plugins.entry.trim().is_empty() {
            anyhow::bail!("plugins.entry must not be empty");
        }

        if self.pool.max_idle == 0 {
            anyhow::bail!("pool.max_idle must be greater than 0");
        }

        Ok(())
    }

    /// Get the plugin directory
    ///
    /// Returns the configured directory or the default XDG data directory path
    pub fn plugins_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.plugins.dir {
            return Ok(dir.clone());
        }

        Ok(project_dirs()?.data_dir().join("plugins"))
    }

    /// Pool tuning derived from the `[pool]` section.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle: self.pool.max_idle,
            memory_limit: self.pool.memory_limit,
            max_stack_size: self.pool.max_stack_size,
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "quill").context("Failed to determine project directories")
}

const DEFAULT_CONFIG: &str = r#"# Quill Host Configuration
# This file configures the quill-host behavior.

[host]
# Name reported in logs
# Default: "quill"
name = "quill"

# Bind address for the request listener
# Default: "127.0.0.1:4040"
bind_address = "127.0.0.1:4040"

# Log level: trace, debug, info, warn, error
# Default: "info"
# RUST_LOG overrides this value.
log_level = "info"

[plugins]
# Directory holding one sub-directory per plugin
# If not specified, defaults to $XDG_DATA_HOME/quill/plugins
# dir = "/path/to/plugins"

# Entry script inside each plugin directory
# Default: "index.js"
entry = "index.js"

[pool]
# Idle execution contexts kept per sub-pool
# Default: 8
max_idle = 8

# Memory limit per interpreter in bytes (0 = unlimited)
# Default: 67108864 (64 MiB)
memory_limit = 67108864

# Stack size per interpreter in bytes (0 = engine default)
# Default: 1048576 (1 MiB)
max_stack_size = 1048576

# Free-form settings, readable and patchable by plugins
[settings]
# page_size = 20
"#;
