//! JSON-RPC server implementation for quill-host.
//!
//! This module provides the server that listens on TCP and handles incoming
//! JSON-RPC requests from clients.

use anyhow::{Context, Result};
use jsonrpsee::server::{Server, ServerHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use super::handlers::{ApiImpl, QuillApiServer};
use crate::host::Host;

/// Start the JSON-RPC API server on `addr`.
///
/// # Returns
///
/// A tuple of (ServerHandle, SocketAddr) - the handle keeps the server running,
/// and the address shows where it's listening
pub async fn start_server(host: Arc<Host>, addr: &str) -> Result<(ServerHandle, SocketAddr)> {
    info!("Starting JSON-RPC server on {}", addr);

    let api = ApiImpl::new(host);

    let server = Server::builder()
        .build(addr)
        .await
        .with_context(|| format!("Failed to build JSON-RPC server on {addr}"))?;

    let local = server.local_addr().context("Failed to get server address")?;
    info!("JSON-RPC server listening on {}", local);

    let handle = server.start(api.into_rpc());

    Ok((handle, local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use jsonrpsee::core::client::ClientT;
    use jsonrpsee::http_client::HttpClientBuilder;
    use jsonrpsee::rpc_params;
    use quill_plugin_api::{Manager, Plugin};
    use quill_runtime::Pool;
    use serde_json::{json, Value as JsonValue};

    fn host() -> Arc<Host> {
        let pool = Arc::new(Pool::default());
        let mut manager = Manager::new(Arc::clone(&pool));
        let source = r#"
function echo(request) { return { got: request.body, id: request.params.id }; }
function secret() { return "hidden"; }
function Init(init) {
    init.resource.Group("echo").Add(echo, { method: "POST", path: "/:id" });
    init.resource.Add(secret, { path: "/secret", visibility: "private" });
}
"#;
        manager.add(Plugin::from_source("echo", source, Arc::clone(&pool)).unwrap());
        let mut host = Host::with_manager(HostConfig::default(), pool, manager);
        host.start().unwrap();
        Arc::new(host)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_dispatches_requests() {
        let (handle, addr) = start_server(host(), "127.0.0.1:0").await.unwrap();
        let client = HttpClientBuilder::default().build(format!("http://{}", addr)).unwrap();

        let reply: JsonValue = client
            .request("resource.dispatch", rpc_params!["POST", "/echo/7", json!({ "a": 1 })])
            .await
            .unwrap();
        assert_eq!(reply, json!({ "status": 200, "body": { "got": { "a": 1 }, "id": "7" } }));

        let reply: JsonValue = client
            .request("resource.dispatch", rpc_params!["GET", "/echo/7"])
            .await
            .unwrap();
        assert_eq!(reply["status"], 404);

        let reply: JsonValue = client
            .request("resource.dispatch", rpc_params!["GET", "/secret"])
            .await
            .unwrap();
        assert_eq!(reply["status"], 404);

        let routes: JsonValue = client.request("routes.list", rpc_params![]).await.unwrap();
        assert_eq!(routes, json!([{ "method": "POST", "path": "/echo/:id" }]));

        let plugins: JsonValue = client.request("plugins.list", rpc_params![]).await.unwrap();
        assert_eq!(plugins[0]["name"], "echo");
        assert_eq!(plugins[0]["state"], "initialized");

        handle.stop().unwrap();
    }
}
