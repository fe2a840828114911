//! Lifecycle hooks registered by plugins.
//!
//! A plugin registers a guest function for a host event during `Config`
//! (`config.OnPreCreate(fn)`). The host keeps a data-only [`HookAdapter`]
//! per registration and, when the event fires, calls every adapter for that
//! event in registration order with the event's arguments:
//!
//! | Event | Arguments |
//! |---|---|
//! | `PreCreate` | `ctx, schema, values` |
//! | `PostCreate` | `ctx, schema, values, created` |
//! | `PreUpdate` | `ctx, schema, predicates, values` |
//! | `PostUpdate` | `ctx, schema, predicates, values, affected` |
//! | `PreDelete` | `ctx, schema, predicates` |
//! | `PostDelete` | `ctx, schema, predicates, affected` |
//! | `PreQuery` | `ctx, sql, args` |
//! | `PostQuery` | `ctx, sql, args, rows` |
//! | `PreExec` | `ctx, sql, args` |
//! | `PostExec` | `ctx, sql, args, affected` |
//! | `PreResolve` | `request` |
//! | `PostResolve` | `request, response` |

use crate::persistence::Filter;
use quill_runtime::{json_args, FunctionRef, Globals, Pool, RuntimeResult};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Host events a plugin can hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    PreCreate,
    PostCreate,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
    PreQuery,
    PostQuery,
    PreExec,
    PostExec,
    PreResolve,
    PostResolve,
}

impl HookEvent {
    /// Every event, in registration-method order.
    pub const ALL: [HookEvent; 12] = [
        HookEvent::PreCreate,
        HookEvent::PostCreate,
        HookEvent::PreUpdate,
        HookEvent::PostUpdate,
        HookEvent::PreDelete,
        HookEvent::PostDelete,
        HookEvent::PreQuery,
        HookEvent::PostQuery,
        HookEvent::PreExec,
        HookEvent::PostExec,
        HookEvent::PreResolve,
        HookEvent::PostResolve,
    ];

    /// Event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreCreate => "PreCreate",
            HookEvent::PostCreate => "PostCreate",
            HookEvent::PreUpdate => "PreUpdate",
            HookEvent::PostUpdate => "PostUpdate",
            HookEvent::PreDelete => "PreDelete",
            HookEvent::PostDelete => "PostDelete",
            HookEvent::PreQuery => "PreQuery",
            HookEvent::PostQuery => "PostQuery",
            HookEvent::PreExec => "PreExec",
            HookEvent::PostExec => "PostExec",
            HookEvent::PreResolve => "PreResolve",
            HookEvent::PostResolve => "PostResolve",
        }
    }

    /// Name of the configuration method that registers this event.
    pub fn registration_method(&self) -> String {
        format!("On{}", self.as_str())
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of a fired event, one variant per [`HookEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum HookArgs {
    PreCreate {
        ctx: JsonValue,
        schema: String,
        values: Map<String, JsonValue>,
    },
    PostCreate {
        ctx: JsonValue,
        schema: String,
        values: Map<String, JsonValue>,
        created: JsonValue,
    },
    PreUpdate {
        ctx: JsonValue,
        schema: String,
        predicates: Vec<Filter>,
        values: Map<String, JsonValue>,
    },
    PostUpdate {
        ctx: JsonValue,
        schema: String,
        predicates: Vec<Filter>,
        values: Map<String, JsonValue>,
        affected: u64,
    },
    PreDelete {
        ctx: JsonValue,
        schema: String,
        predicates: Vec<Filter>,
    },
    PostDelete {
        ctx: JsonValue,
        schema: String,
        predicates: Vec<Filter>,
        affected: u64,
    },
    PreQuery {
        ctx: JsonValue,
        sql: String,
        args: Vec<JsonValue>,
    },
    PostQuery {
        ctx: JsonValue,
        sql: String,
        args: Vec<JsonValue>,
        rows: Vec<JsonValue>,
    },
    PreExec {
        ctx: JsonValue,
        sql: String,
        args: Vec<JsonValue>,
    },
    PostExec {
        ctx: JsonValue,
        sql: String,
        args: Vec<JsonValue>,
        affected: u64,
    },
    PreResolve {
        request: JsonValue,
    },
    PostResolve {
        request: JsonValue,
        response: JsonValue,
    },
}

impl HookArgs {
    /// The event these arguments belong to.
    pub fn event(&self) -> HookEvent {
        match self {
            HookArgs::PreCreate { .. } => HookEvent::PreCreate,
            HookArgs::PostCreate { .. } => HookEvent::PostCreate,
            HookArgs::PreUpdate { .. } => HookEvent::PreUpdate,
            HookArgs::PostUpdate { .. } => HookEvent::PostUpdate,
            HookArgs::PreDelete { .. } => HookEvent::PreDelete,
            HookArgs::PostDelete { .. } => HookEvent::PostDelete,
            HookArgs::PreQuery { .. } => HookEvent::PreQuery,
            HookArgs::PostQuery { .. } => HookEvent::PostQuery,
            HookArgs::PreExec { .. } => HookEvent::PreExec,
            HookArgs::PostExec { .. } => HookEvent::PostExec,
            HookArgs::PreResolve { .. } => HookEvent::PreResolve,
            HookArgs::PostResolve { .. } => HookEvent::PostResolve,
        }
    }

    /// Positional call arguments in the event's fixed order.
    pub fn arguments(&self) -> Vec<JsonValue> {
        fn filters(predicates: &[Filter]) -> JsonValue {
            JsonValue::Array(predicates.iter().cloned().map(JsonValue::Object).collect())
        }

        match self {
            HookArgs::PreCreate { ctx, schema, values } => {
                vec![ctx.clone(), schema.as_str().into(), values.clone().into()]
            }
            HookArgs::PostCreate {
                ctx,
                schema,
                values,
                created,
            } => vec![
                ctx.clone(),
                schema.as_str().into(),
                values.clone().into(),
                created.clone(),
            ],
            HookArgs::PreUpdate {
                ctx,
                schema,
                predicates,
                values,
            } => vec![
                ctx.clone(),
                schema.as_str().into(),
                filters(predicates),
                values.clone().into(),
            ],
            HookArgs::PostUpdate {
                ctx,
                schema,
                predicates,
                values,
                affected,
            } => vec![
                ctx.clone(),
                schema.as_str().into(),
                filters(predicates),
                values.clone().into(),
                (*affected).into(),
            ],
            HookArgs::PreDelete {
                ctx,
                schema,
                predicates,
            } => vec![ctx.clone(), schema.as_str().into(), filters(predicates)],
            HookArgs::PostDelete {
                ctx,
                schema,
                predicates,
                affected,
            } => vec![
                ctx.clone(),
                schema.as_str().into(),
                filters(predicates),
                (*affected).into(),
            ],
            HookArgs::PreQuery { ctx, sql, args } | HookArgs::PreExec { ctx, sql, args } => {
                vec![ctx.clone(), sql.as_str().into(), args.clone().into()]
            }
            HookArgs::PostQuery { ctx, sql, args, rows } => vec![
                ctx.clone(),
                sql.as_str().into(),
                args.clone().into(),
                rows.clone().into(),
            ],
            HookArgs::PostExec {
                ctx,
                sql,
                args,
                affected,
            } => vec![
                ctx.clone(),
                sql.as_str().into(),
                args.clone().into(),
                (*affected).into(),
            ],
            HookArgs::PreResolve { request } => vec![request.clone()],
            HookArgs::PostResolve { request, response } => vec![request.clone(), response.clone()],
        }
    }
}

/// Binding of one host event to one guest function.
#[derive(Debug, Clone)]
pub struct HookAdapter {
    /// Event the adapter listens to.
    pub event: HookEvent,
    /// Guest function to call.
    pub function: FunctionRef,
    /// Plugin that registered the adapter.
    pub plugin: String,
}

/// Ordered, append-only hook adapters per event.
pub struct HookRegistry {
    pool: Arc<Pool>,
    adapters: RwLock<HashMap<HookEvent, Vec<HookAdapter>>>,
    ambient: RwLock<HashMap<String, Globals>>,
}

impl HookRegistry {
    /// Create an empty registry whose hooks run in `pool`.
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            pool,
            adapters: RwLock::new(HashMap::new()),
            ambient: RwLock::new(HashMap::new()),
        }
    }

    /// Pool hooks are invoked in.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Append an adapter after all adapters already registered for its event.
    pub fn register(&self, adapter: HookAdapter) {
        debug!(
            plugin = %adapter.plugin,
            event = %adapter.event,
            function = %adapter.function.name(),
            "Registered hook"
        );
        write(&self.adapters).entry(adapter.event).or_default().push(adapter);
    }

    /// Adapters registered for `event`, in registration order.
    pub fn adapters(&self, event: HookEvent) -> Vec<HookAdapter> {
        read(&self.adapters).get(&event).cloned().unwrap_or_default()
    }

    /// Total number of registered adapters.
    pub fn len(&self) -> usize {
        read(&self.adapters).values().map(Vec::len).sum()
    }

    /// Whether no adapters are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the ambient globals hooks of `plugin` run with.
    ///
    /// Hooks fired before a plugin's globals are bound run without them.
    pub fn bind_ambient(&self, plugin: impl Into<String>, globals: Globals) {
        write(&self.ambient).insert(plugin.into(), globals);
    }

    /// Fire an event.
    ///
    /// Adapters run in registration order; the first failure stops the
    /// fan-out and is returned to the host operation that fired the event.
    pub fn fire(&self, args: &HookArgs) -> RuntimeResult<()> {
        let event = args.event();
        let adapters = self.adapters(event);
        if adapters.is_empty() {
            return Ok(());
        }

        let call_args = json_args(args.arguments());
        for adapter in adapters {
            let globals = read(&self.ambient)
                .get(&adapter.plugin)
                .cloned()
                .unwrap_or_default();

            debug!(plugin = %adapter.plugin, event = %event, function = %adapter.function.name(), "Firing hook");
            if let Err(e) = adapter.function.call(&self.pool, &globals, &call_args) {
                warn!(plugin = %adapter.plugin, event = %event, "Hook failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("adapters", &self.len())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_method_names() {
        assert_eq!(HookEvent::PreCreate.registration_method(), "OnPreCreate");
        assert_eq!(HookEvent::PostResolve.registration_method(), "OnPostResolve");
        assert_eq!(HookEvent::ALL.len(), 12);
    }

    #[test]
    fn test_argument_order() {
        let mut values = Map::new();
        values.insert("title".into(), json!("hi"));
        let mut filter = Map::new();
        filter.insert("id".into(), json!(1));

        let args = HookArgs::PostUpdate {
            ctx: json!({ "id": "c" }),
            schema: "post".into(),
            predicates: vec![filter],
            values,
            affected: 3,
        };
        assert_eq!(args.event(), HookEvent::PostUpdate);
        assert_eq!(
            args.arguments(),
            vec![
                json!({ "id": "c" }),
                json!("post"),
                json!([{ "id": 1 }]),
                json!({ "title": "hi" }),
                json!(3),
            ]
        );
    }

    #[test]
    fn test_fire_without_adapters_is_noop() {
        let registry = HookRegistry::new(Arc::new(Pool::default()));
        assert!(registry.is_empty());
        registry
            .fire(&HookArgs::PreResolve { request: json!({}) })
            .unwrap();
    }
}
