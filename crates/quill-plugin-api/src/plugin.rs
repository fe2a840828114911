//! A loaded plugin and its lifecycle.
//!
//! ```text
//! Loaded ──config()──> Configured ──init()──> Initialized
//! ```
//!
//! Both entry points are optional: a plugin that does not define `Config`
//! or `Init` still advances to the next state.

use quill_runtime::{
    call_function, GuestArg, Globals, PluginManifest, PluginPath, Pool, Program, RuntimeError, RuntimeResult,
};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the configuration entry point.
pub const CONFIG_ENTRY: &str = "Config";

/// Name of the initialization entry point.
pub const INIT_ENTRY: &str = "Init";

/// Lifecycle state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Compiled, no entry point run yet.
    Loaded,
    /// `Config` has run.
    Configured,
    /// `Init` has run.
    Initialized,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            PluginState::Loaded => "loaded",
            PluginState::Configured => "configured",
            PluginState::Initialized => "initialized",
        };
        f.write_str(state)
    }
}

/// What a façade needs to know about the plugin it is handed to.
#[derive(Clone)]
pub struct PluginScope {
    /// Plugin name.
    pub name: String,
    /// The plugin's program.
    pub program: Arc<Program>,
    /// Pool the plugin's functions run in.
    pub pool: Arc<Pool>,
}

impl fmt::Debug for PluginScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginScope")
            .field("name", &self.name)
            .field("program", &self.program.identity())
            .finish()
    }
}

/// The argument and globals an entry point is called with.
pub struct FacadeBinding {
    /// Sole argument of the entry point.
    pub argument: GuestArg,
    /// Globals injected into the entry point's contexts.
    pub globals: Globals,
}

/// A host object handed to a lifecycle entry point.
pub trait Facade: Send + Sync {
    /// Bind the façade to one plugin.
    fn bind(&self, scope: &PluginScope) -> FacadeBinding;
}

/// One discovered plugin script.
pub struct Plugin {
    scope: PluginScope,
    path: Option<PathBuf>,
    manifest: PluginManifest,
    state: PluginState,
}

impl Plugin {
    /// Compile a discovered plugin.
    pub fn load(plugin_path: &PluginPath, pool: Arc<Pool>) -> RuntimeResult<Self> {
        info!(
            "Loading plugin: {} v{}",
            plugin_path.name,
            plugin_path.version().unwrap_or("0.0.0")
        );
        let program = Program::load(plugin_path.name.as_str(), &plugin_path.entry)?;

        Ok(Self {
            scope: PluginScope {
                name: plugin_path.name.clone(),
                program,
                pool,
            },
            path: Some(plugin_path.path.clone()),
            manifest: plugin_path.manifest.clone(),
            state: PluginState::Loaded,
        })
    }

    /// Compile a plugin from source text.
    pub fn from_source(name: impl Into<String>, source: impl Into<String>, pool: Arc<Pool>) -> RuntimeResult<Self> {
        let name = name.into();
        let program = Program::compile(name.as_str(), source)?;

        Ok(Self {
            scope: PluginScope { name, program, pool },
            path: None,
            manifest: PluginManifest::default(),
            state: PluginState::Loaded,
        })
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.scope.name
    }

    /// Compiled program.
    pub fn program(&self) -> &Arc<Program> {
        &self.scope.program
    }

    /// Plugin directory, if loaded from disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Plugin manifest.
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Façade scope of this plugin.
    pub fn scope(&self) -> &PluginScope {
        &self.scope
    }

    /// Run the `Config` entry point.
    pub fn config(&mut self, facade: &dyn Facade) -> RuntimeResult<()> {
        self.expect_state(PluginState::Loaded, "Config")?;
        self.run_entry(CONFIG_ENTRY, facade)?;
        self.state = PluginState::Configured;
        Ok(())
    }

    /// Run the `Init` entry point.
    pub fn init(&mut self, facade: &dyn Facade) -> RuntimeResult<()> {
        self.expect_state(PluginState::Configured, "Init")?;
        self.run_entry(INIT_ENTRY, facade)?;
        self.state = PluginState::Initialized;
        Ok(())
    }

    fn expect_state(&self, expected: PluginState, phase: &'static str) -> RuntimeResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RuntimeError::InvalidLifecycle {
                plugin: self.scope.name.clone(),
                phase,
                state: self.state.to_string(),
            })
        }
    }

    fn run_entry(&self, entry: &str, facade: &dyn Facade) -> RuntimeResult<()> {
        let binding = facade.bind(&self.scope);
        let result = call_function(
            &self.scope.pool,
            &self.scope.program,
            entry,
            &binding.globals,
            &[binding.argument],
        );

        match result {
            Ok(_) => {
                debug!(plugin = %self.scope.name, "Ran {}", entry);
                Ok(())
            }
            Err(e) if e.is_function_not_found() => {
                debug!(plugin = %self.scope.name, "No {} entry point", entry);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.scope.name)
            .field("path", &self.path)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(serde_json::Value);

    impl Facade for Fixed {
        fn bind(&self, _scope: &PluginScope) -> FacadeBinding {
            FacadeBinding {
                argument: Arc::new(self.0.clone()),
                globals: Globals::new(),
            }
        }
    }

    #[test]
    fn test_missing_entry_points_are_noops() {
        let mut plugin = Plugin::from_source("empty", "var nothing = 1;", Arc::new(Pool::default())).unwrap();
        plugin.config(&Fixed(json!({}))).unwrap();
        assert_eq!(plugin.state(), PluginState::Configured);
        plugin.init(&Fixed(json!({}))).unwrap();
        assert_eq!(plugin.state(), PluginState::Initialized);
    }

    #[test]
    fn test_out_of_order_lifecycle() {
        let mut plugin = Plugin::from_source("early", "", Arc::new(Pool::default())).unwrap();
        let err = plugin.init(&Fixed(json!({}))).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidLifecycle { phase: "Init", .. }));

        plugin.config(&Fixed(json!({}))).unwrap();
        let err = plugin.config(&Fixed(json!({}))).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidLifecycle { phase: "Config", .. }));
    }

    #[test]
    fn test_failing_entry_point_keeps_state() {
        let mut plugin = Plugin::from_source(
            "failing",
            "function Config(c) { throw new Error('bad ' + c.mode); }",
            Arc::new(Pool::default()),
        )
        .unwrap();
        let err = plugin.config(&Fixed(json!({ "mode": "config" }))).unwrap_err();
        assert!(err.to_string().contains("bad config"));
        assert_eq!(plugin.state(), PluginState::Loaded);
    }
}
