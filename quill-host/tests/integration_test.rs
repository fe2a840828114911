//! Integration tests for quill-host.
//!
//! Plugins are written to a temporary directory and loaded through the
//! configured plugin directory, the way the daemon loads them.

use quill_host::{Host, HostConfig};
use quill_plugin_api::{PluginState, QuerySpec, Response};
use serde_json::{json, Value as JsonValue};
use std::path::Path;
use tempfile::TempDir;

fn write_plugin(root: &Path, name: &str, source: &str, manifest: Option<&str>) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.js"), source).unwrap();
    if let Some(manifest) = manifest {
        std::fs::write(dir.join("manifest.toml"), manifest).unwrap();
    }
}

fn config_for(root: &Path) -> HostConfig {
    let mut config = HostConfig::default();
    config.plugins.dir = Some(root.to_path_buf());
    config
}

const BLOG: &str = r#"
function Config(config) {
    config.AddSchemas({ name: "post", fields: { title: "string" } }, { name: "audit" });
    config.Set({ settings: { pageSize: 2 } });
    config.OnPreCreate((ctx, schema, values) => {
        if (schema === "post" && !values.title) throw new Error("title is required");
    });
}

function createPost(request) {
    return db().Create(context(), "post", request.body);
}

function getPost(request) {
    const post = db().Builder("post").Where({ id: Number(request.params.id) }).First(context());
    if (post === null) return { "$response": "raw", status: 404, body: "no such post" };
    return post;
}

function listPosts() {
    return db().Builder("post").Limit(2).Get(context());
}

function Init(init) {
    logger().info("registering routes for " + init.name);
    const posts = init.resource.Group("posts");
    posts.Add(createPost, { method: "POST" });
    posts.Add(listPosts);
    posts.Add(getPost, { path: "/:id" });
}
"#;

const AUDIT: &str = r#"
function Config(config) {
    config.OnPostResolve((request, response) => {
        db().Create(context(), "audit", { path: request.path, status: response.status });
    });
}
"#;

#[test]
fn test_host_serves_discovered_plugins() {
    let temp_dir = TempDir::new().unwrap();
    write_plugin(temp_dir.path(), "blog", BLOG, Some("[plugin]\nversion = \"1.2.0\"\n"));
    write_plugin(temp_dir.path(), "zz-audit", AUDIT, None);

    let mut host = Host::new(config_for(temp_dir.path())).unwrap();
    host.start().unwrap();

    let plugins = host.list_plugins();
    assert_eq!(plugins.len(), 2);
    assert_eq!(plugins[0].name, "blog");
    assert_eq!(plugins[0].version.as_deref(), Some("1.2.0"));
    assert!(plugins.iter().all(|p| p.state == PluginState::Initialized));
    assert_eq!(host.config().settings["pageSize"], toml::Value::Integer(2));

    let created = host.dispatch("POST", "/posts", json!({ "title": "hello" }));
    assert_eq!(created, Response::Json(json!({ "title": "hello", "id": 1 })));
    host.dispatch("POST", "/posts", json!({ "title": "again" }));
    host.dispatch("POST", "/posts", json!({ "title": "third" }));

    let rejected = host.dispatch("POST", "/posts", json!({}));
    assert_eq!(rejected.status(), 500);

    match host.dispatch("GET", "/posts", JsonValue::Null) {
        Response::Json(JsonValue::Array(posts)) => assert_eq!(posts.len(), 2),
        other => panic!("unexpected response: {other:?}"),
    }

    assert_eq!(
        host.dispatch("GET", "/posts/1", JsonValue::Null),
        Response::Json(json!({ "title": "hello", "id": 1 }))
    );
    assert_eq!(host.dispatch("GET", "/posts/99", JsonValue::Null).status(), 404);

    let audited = host
        .persistence()
        .select(&json!({}), &QuerySpec::new("audit"))
        .unwrap();
    let statuses: Vec<_> = audited.iter().map(|row| row["status"].clone()).collect();
    assert_eq!(statuses, vec![json!(200), json!(200), json!(200), json!(500), json!(200), json!(200), json!(404)]);
}

#[test]
fn test_disabled_plugins_are_not_loaded() {
    let temp_dir = TempDir::new().unwrap();
    write_plugin(temp_dir.path(), "blog", BLOG, None);
    write_plugin(
        temp_dir.path(),
        "off",
        "function Init() { throw new Error('should not run'); }",
        Some("[plugin]\nenabled = false\n"),
    );

    let mut host = Host::new(config_for(temp_dir.path())).unwrap();
    host.start().unwrap();
    assert_eq!(host.list_plugins().len(), 1);
}

#[test]
fn test_compile_error_fails_host_construction() {
    let temp_dir = TempDir::new().unwrap();
    write_plugin(temp_dir.path(), "broken", "function Init( {", None);

    let err = Host::new(config_for(temp_dir.path())).err().unwrap();
    assert!(format!("{err:#}").contains("Failed to compile 'broken'"));
}

#[test]
fn test_missing_plugin_dir_starts_empty() {
    let temp_dir = TempDir::new().unwrap();
    let mut host = Host::new(config_for(&temp_dir.path().join("absent"))).unwrap();
    host.start().unwrap();
    assert!(host.list_plugins().is_empty());
    assert!(host.routes().is_empty());
}
