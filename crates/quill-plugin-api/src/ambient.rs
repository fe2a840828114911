//! Ambient bindings available from `Init` onwards.
//!
//! | Global | Returns |
//! |---|---|
//! | `context()` | `{ id, plugin, createdAt }`, a fresh host context |
//! | `logger()` | `{ debug, info, warn, error }` routed to `tracing` |
//! | `db()` | the persistence façade |
//!
//! Every binding is call-site-invariant, so injecting them does not
//! fragment the context pool.

use crate::guest;
use crate::persistence::{DbBinding, Persistence};
use chrono::Utc;
use quill_runtime::rquickjs::function::Rest;
use quill_runtime::rquickjs::{self, Ctx, Function, Object, Value};
use quill_runtime::{json_to_js, Globals, IntoGuest};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// A host context handed to guest code by `context()`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostContext {
    pub id: Uuid,
    pub plugin: String,
    pub created_at: String,
}

impl HostContext {
    /// A new context for `plugin`.
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            plugin: plugin.into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// The `context()` binding.
pub struct ContextBinding {
    plugin: String,
}

impl IntoGuest for ContextBinding {
    fn into_guest<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let plugin = self.plugin.clone();
        let func = Function::new(ctx.clone(), move |ctx: Ctx<'js>| {
            let context = serde_json::to_value(HostContext::new(plugin.as_str()))
                .map_err(|e| guest::throw(&ctx, e))?;
            json_to_js(&ctx, &context)
        })?;
        Ok(func.into_value())
    }
}

/// The `logger()` binding.
pub struct LoggerBinding {
    plugin: String,
}

impl IntoGuest for LoggerBinding {
    fn into_guest<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let plugin = self.plugin.clone();
        let func = Function::new(ctx.clone(), move |ctx: Ctx<'js>| logger(&ctx, &plugin))?;
        Ok(func.into_value())
    }
}

fn logger<'js>(ctx: &Ctx<'js>, plugin: &str) -> rquickjs::Result<Object<'js>> {
    let object = Object::new(ctx.clone())?;
    for level in ["debug", "info", "warn", "error"] {
        let plugin = plugin.to_string();
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
                let mut parts = Vec::with_capacity(args.0.len());
                for arg in args.0 {
                    parts.push(match arg.as_string() {
                        Some(s) => s.to_string()?,
                        None => guest::json(&ctx, arg)?.to_string(),
                    });
                }
                let message = parts.join(" ");
                match level {
                    "debug" => tracing::debug!(plugin = %plugin, "{}", message),
                    "info" => tracing::info!(plugin = %plugin, "{}", message),
                    "warn" => tracing::warn!(plugin = %plugin, "{}", message),
                    _ => tracing::error!(plugin = %plugin, "{}", message),
                }
                Ok(())
            },
        )?;
        object.set(level, func)?;
    }
    Ok(object)
}

/// Ambient globals for `plugin`.
pub fn ambient_globals(plugin: &str, persistence: &Arc<dyn Persistence>) -> Globals {
    Globals::new()
        .with(
            "context",
            Arc::new(ContextBinding {
                plugin: plugin.to_string(),
            }),
        )
        .with(
            "logger",
            Arc::new(LoggerBinding {
                plugin: plugin.to_string(),
            }),
        )
        .with("db", Arc::new(DbBinding::new(persistence)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use quill_runtime::{call_function, Pool, Program};
    use serde_json::json;

    #[test]
    fn test_ambient_bindings() {
        let store = MemoryStore::new();
        store.define("note");
        let persistence: Arc<dyn Persistence> = Arc::new(store);

        let program = Program::compile(
            "ambient",
            r#"
function inspect() {
    const ctx = context();
    logger().info("inspecting", { plugin: ctx.plugin });
    db().Create(ctx, "note", { text: "hi" });
    return { plugin: ctx.plugin, hasId: ctx.id.length === 36, count: db().Builder("note").Count(ctx) };
}
"#,
        )
        .unwrap();

        let pool = Pool::default();
        let globals = ambient_globals("ambient", &persistence);
        let result = call_function(&pool, &program, "inspect", &globals, &[]).unwrap();
        assert_eq!(result, json!({ "plugin": "ambient", "hasId": true, "count": 1 }));
    }

    #[test]
    fn test_db_after_persistence_dropped() {
        let persistence: Arc<dyn Persistence> = Arc::new(MemoryStore::new());
        let globals = ambient_globals("gone", &persistence);
        drop(persistence);

        let program = Program::compile("gone", "function inspect() { return db(); }").unwrap();
        let err = call_function(&Pool::default(), &program, "inspect", &globals, &[]).unwrap_err();
        assert!(err.to_string().contains("no longer available"));
    }
}
