//! JSON-RPC API handlers for quill-host.
//!
//! `resource.dispatch` carries a request to the plugin handler routed for
//! it and returns the response description produced by `Response::to_json`.
//! Only public routes are reachable or listed.

use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use quill_plugin_api::{PluginInfo, Visibility};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

use crate::host::Host;

/// The quill JSON-RPC interface.
#[rpc(server)]
pub trait QuillApi {
    /// Dispatch a request to a public plugin route.
    #[method(name = "resource.dispatch")]
    async fn dispatch(&self, method: String, path: String, body: Option<JsonValue>) -> RpcResult<JsonValue>;

    /// List loaded plugins and their lifecycle state.
    #[method(name = "plugins.list")]
    async fn list_plugins(&self) -> RpcResult<Vec<PluginInfo>>;

    /// List public routes.
    #[method(name = "routes.list")]
    async fn list_routes(&self) -> RpcResult<Vec<RouteSummary>>;
}

/// A public route as seen by clients.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub method: String,
    pub path: String,
}

/// Implementation of the quill API over a started [`Host`].
pub struct ApiImpl {
    host: Arc<Host>,
}

impl ApiImpl {
    pub fn new(host: Arc<Host>) -> Self {
        Self { host }
    }
}

#[jsonrpsee::core::async_trait]
impl QuillApiServer for ApiImpl {
    async fn dispatch(&self, method: String, path: String, body: Option<JsonValue>) -> RpcResult<JsonValue> {
        debug!(%method, %path, "Dispatching request");
        let host = Arc::clone(&self.host);
        // Guest calls block; keep them off the async workers.
        let response = tokio::task::spawn_blocking(move || {
            host.dispatch_public(&method, &path, body.unwrap_or(JsonValue::Null))
        })
        .await
        .map_err(|e| ErrorObjectOwned::owned(-32000, format!("Dispatch task failed: {}", e), None::<()>))?;
        Ok(response.to_json())
    }

    async fn list_plugins(&self) -> RpcResult<Vec<PluginInfo>> {
        Ok(self.host.list_plugins())
    }

    async fn list_routes(&self) -> RpcResult<Vec<RouteSummary>> {
        let routes = self
            .host
            .routes()
            .into_iter()
            .filter(|route| route.visibility == Visibility::Public)
            .map(|route| RouteSummary {
                method: route.method,
                path: route.path,
            })
            .collect();
        Ok(routes)
    }
}
