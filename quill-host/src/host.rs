//! The host: owns the shared runtime state and drives the plugin lifecycle.

use crate::config::HostConfig;
use anyhow::{Context, Result};
use quill_plugin_api::{
    ConfigFacade, HookArgs, HookRegistry, HookedPersistence, InitFacade, Manager, MemoryStore, Persistence,
    PluginInfo, ResourceTree, Response, Route, Visibility,
};
use quill_runtime::Pool;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// A running quill host.
pub struct Host {
    config: Arc<RwLock<HostConfig>>,
    pool: Arc<Pool>,
    hooks: Arc<HookRegistry>,
    resources: Arc<ResourceTree>,
    store: MemoryStore,
    persistence: Arc<dyn Persistence>,
    manager: Manager,
}

impl Host {
    /// Build a host and load the plugins under the configured directory.
    pub fn new(config: HostConfig) -> Result<Self> {
        let pool = Arc::new(Pool::new(config.pool_config()));
        let plugins_dir = config.plugins_dir()?;
        let manager = Manager::load(&plugins_dir, &config.plugins.entry, Arc::clone(&pool))
            .with_context(|| format!("Failed to load plugins from {}", plugins_dir.display()))?;

        Ok(Self::with_manager(config, pool, manager))
    }

    /// Build a host around an already loaded manager.
    pub fn with_manager(config: HostConfig, pool: Arc<Pool>, manager: Manager) -> Self {
        let hooks = Arc::new(HookRegistry::new(Arc::clone(&pool)));
        let store = MemoryStore::new();
        let persistence: Arc<dyn Persistence> =
            Arc::new(HookedPersistence::new(Arc::new(store.clone()), Arc::clone(&hooks)));

        Self {
            config: Arc::new(RwLock::new(config)),
            pool,
            hooks,
            resources: Arc::new(ResourceTree::new()),
            store,
            persistence,
            manager,
        }
    }

    /// Run the `Config` and `Init` phases of every plugin.
    ///
    /// Schemas declared during `Config` are defined in the store before
    /// `Init` runs.
    pub fn start(&mut self) -> Result<()> {
        let config = ConfigFacade::new(Arc::clone(&self.config), Arc::clone(&self.hooks))
            .with_validator(|record: &HostConfig| record.validate().map_err(|e| format!("{e:#}")));
        self.manager.config(&config).context("Config phase failed")?;

        for schema in config.schemas() {
            debug!(schema = %schema.name, "Defining schema");
            self.store.define(schema.name);
        }

        let init = InitFacade::new(
            Arc::clone(&self.resources),
            Arc::clone(&self.persistence),
            Arc::clone(&self.hooks),
        );
        self.manager.init(&init).context("Init phase failed")?;

        info!(
            plugins = self.manager.plugin_count(),
            hooks = self.hooks.len(),
            routes = self.resources.routes().len(),
            "Host started"
        );
        Ok(())
    }

    /// Handle a request against every registered route.
    pub fn dispatch(&self, method: &str, path: &str, body: JsonValue) -> Response {
        match self.resources.route(method, path) {
            Some((route, params)) => self.handle(route, path, params, body),
            None => not_found(method, path),
        }
    }

    /// Handle a request from outside the host; private routes are hidden.
    pub fn dispatch_public(&self, method: &str, path: &str, body: JsonValue) -> Response {
        match self.resources.route(method, path) {
            Some((route, params)) if route.visibility == Visibility::Public => self.handle(route, path, params, body),
            _ => not_found(method, path),
        }
    }

    fn handle(&self, route: Route, path: &str, params: BTreeMap<String, String>, body: JsonValue) -> Response {
        let Some(handler) = self.resources.handler(route.node) else {
            return not_found(&route.method, &route.path);
        };

        let request = json!({
            "method": route.method,
            "path": path,
            "route": route.path,
            "params": params,
            "body": body,
        });

        if let Err(e) = self.hooks.fire(&HookArgs::PreResolve {
            request: request.clone(),
        }) {
            warn!(route = %route.path, "PreResolve hook failed: {}", e);
            return Response::server_error(e.to_string());
        }

        let response = handler.handle(&request);

        if let Err(e) = self.hooks.fire(&HookArgs::PostResolve {
            request,
            response: response.to_json(),
        }) {
            warn!(route = %route.path, "PostResolve hook failed: {}", e);
            return Response::server_error(e.to_string());
        }

        debug!(method = %route.method, route = %route.path, status = response.status(), "Dispatched request");
        response
    }

    /// Current configuration record, including plugin patches.
    pub fn config(&self) -> HostConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Registered routes.
    pub fn routes(&self) -> Vec<Route> {
        self.resources.routes()
    }

    /// Loaded plugins and their lifecycle state.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.manager.list_plugins()
    }

    /// Persistence as seen by plugins, with hooks applied.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Hook registry.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Execution context pool.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }
}

fn not_found(method: &str, path: &str) -> Response {
    debug!(%method, %path, "No route");
    Response::not_found(format!("No route for {} {}", method.to_ascii_uppercase(), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_plugin_api::{Plugin, QuerySpec};

    fn host(source: &str) -> Host {
        let pool = Arc::new(Pool::default());
        let mut manager = Manager::new(Arc::clone(&pool));
        manager.add(Plugin::from_source("test", source, Arc::clone(&pool)).unwrap());
        let mut host = Host::with_manager(HostConfig::default(), pool, manager);
        host.start().unwrap();
        host
    }

    #[test]
    fn test_unknown_route_is_not_found() {
        let host = host("");
        let response = host.dispatch("GET", "/nothing", JsonValue::Null);
        assert_eq!(response.status(), 404);
    }

    #[test]
    fn test_config_patch_updates_record() {
        let host = host(r#"function Config(config) { config.Set({ settings: { pageSize: 5 } }); }"#);
        assert_eq!(host.config().settings["pageSize"], toml::Value::Integer(5));
    }

    #[test]
    fn test_invalid_patch_fails_start() {
        let pool = Arc::new(Pool::default());
        let mut manager = Manager::new(Arc::clone(&pool));
        let source = r#"function Config(config) { config.Set({ host: { log_level: "loud" } }); }"#;
        manager.add(Plugin::from_source("bad", source, Arc::clone(&pool)).unwrap());

        let mut host = Host::with_manager(HostConfig::default(), pool, manager);
        let err = host.start().unwrap_err();
        assert!(format!("{err:#}").contains("Invalid log_level"));
        assert_eq!(host.config().host.log_level, "info");
    }

    #[test]
    fn test_declared_schemas_are_defined() {
        let host = host(
            r#"
function Config(config) { config.AddSchemas({ name: "note" }); }
function add(request) { return db().Create(context(), "note", request.body); }
function Init(init) { init.resource.Add(add, { method: "POST", path: "/notes" }); }
"#,
        );

        let response = host.dispatch("POST", "/notes", json!({ "text": "hi" }));
        assert_eq!(response, Response::Json(json!({ "text": "hi", "id": 1 })));
        assert_eq!(host.persistence().count(&json!({}), &QuerySpec::new("note")).unwrap(), 1);
    }

    #[test]
    fn test_private_routes_are_hidden_from_public_dispatch() {
        let host = host(
            r#"
function secret() { return "s3cret"; }
function Init(init) { init.resource.Add(secret, { path: "/secret", visibility: "private" }); }
"#,
        );

        assert_eq!(host.dispatch("GET", "/secret", JsonValue::Null), Response::Json(json!("s3cret")));
        assert_eq!(host.dispatch_public("GET", "/secret", JsonValue::Null).status(), 404);
    }
}
