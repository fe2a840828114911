//! The configuration façade passed to a plugin's `Config` entry point.
//!
//! ```js
//! function Config(config) {
//!     config.Set({ settings: { pageSize: 20 } });
//!     config.AddSchemas({ name: "post", fields: { title: "string" } });
//!     config.OnPreCreate(beforeCreate);
//!     config.OnPostResolve((request, response) => logger().info(response.status));
//! }
//! ```

use crate::guest;
use crate::hooks::{HookAdapter, HookEvent, HookRegistry};
use crate::plugin::{Facade, FacadeBinding, PluginScope};
use quill_runtime::rquickjs::function::Rest;
use quill_runtime::rquickjs::{self, Ctx, Function, Object, Value};
use quill_runtime::{resolve_handler, Globals, IntoGuest, RuntimeError, RuntimeResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// A schema declared by a plugin.
///
/// Only the name is interpreted here; the rest of the declaration is
/// handed to the schema system unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDecl {
    pub name: String,
    #[serde(flatten)]
    pub definition: Map<String, JsonValue>,
}

/// Checks a patched configuration record before it replaces the current one.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Host handle to the configuration record, declared schemas and hooks.
pub struct ConfigFacade<T> {
    record: Arc<RwLock<T>>,
    schemas: Arc<RwLock<Vec<SchemaDecl>>>,
    hooks: Arc<HookRegistry>,
    validator: Option<Validator<T>>,
}

impl<T> Clone for ConfigFacade<T> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
            schemas: Arc::clone(&self.schemas),
            hooks: Arc::clone(&self.hooks),
            validator: self.validator.clone(),
        }
    }
}

impl<T> ConfigFacade<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// A façade over `record`, registering hooks in `hooks`.
    pub fn new(record: Arc<RwLock<T>>, hooks: Arc<HookRegistry>) -> Self {
        Self {
            record,
            schemas: Arc::new(RwLock::new(Vec::new())),
            hooks,
            validator: None,
        }
    }

    /// Validate every patched record with `validator`.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Shared configuration record.
    pub fn record(&self) -> &Arc<RwLock<T>> {
        &self.record
    }

    /// Hook registry.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Merge `patch` into the record by serialized field name.
    ///
    /// Nested objects merge recursively; any other value replaces the
    /// field. A patch that does not decode or validate leaves the record
    /// unchanged and fails with `DecodeError`.
    pub fn set(&self, patch: &JsonValue) -> RuntimeResult<()> {
        let JsonValue::Object(patch) = patch else {
            return Err(RuntimeError::DecodeError(format!(
                "configuration patch must be an object, got {patch}"
            )));
        };

        let mut record = write(&self.record);
        let mut merged = serde_json::to_value(&*record).map_err(|e| RuntimeError::DecodeError(e.to_string()))?;
        merge(&mut merged, patch);

        let updated: T = serde_json::from_value(merged).map_err(|e| RuntimeError::DecodeError(e.to_string()))?;
        if let Some(validator) = &self.validator {
            validator(&updated).map_err(RuntimeError::DecodeError)?;
        }

        *record = updated;
        debug!(fields = ?patch.keys().collect::<Vec<_>>(), "Applied configuration patch");
        Ok(())
    }

    /// Append schema declarations.
    pub fn add_schemas(&self, schemas: Vec<SchemaDecl>) {
        let mut current = write(&self.schemas);
        for schema in schemas {
            info!(schema = %schema.name, "Added schema");
            current.push(schema);
        }
    }

    /// Declared schemas in declaration order.
    pub fn schemas(&self) -> Vec<SchemaDecl> {
        read(&self.schemas).clone()
    }
}

fn merge(target: &mut JsonValue, patch: &Map<String, JsonValue>) {
    if !target.is_object() {
        *target = JsonValue::Object(Map::new());
    }
    let JsonValue::Object(target) = target else {
        return;
    };
    for (key, value) in patch {
        if let (Some(existing), JsonValue::Object(nested)) = (target.get_mut(key), value) {
            if existing.is_object() {
                merge(existing, nested);
                continue;
            }
        }
        target.insert(key.clone(), value.clone());
    }
}

impl<T> Facade for ConfigFacade<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn bind(&self, scope: &PluginScope) -> FacadeBinding {
        FacadeBinding {
            argument: Arc::new(ConfigBinding {
                facade: self.clone(),
                scope: scope.clone(),
            }),
            globals: Globals::new(),
        }
    }
}

struct ConfigBinding<T> {
    facade: ConfigFacade<T>,
    scope: PluginScope,
}

impl<T> IntoGuest for ConfigBinding<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn into_guest<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let object = Object::new(ctx.clone())?;

        let facade = self.facade.clone();
        object.set(
            "Set",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, patch: Value<'js>| -> rquickjs::Result<()> {
                    let patch = guest::json(&ctx, patch)?;
                    facade.set(&patch).map_err(|e| guest::throw(&ctx, e))
                },
            )?,
        )?;

        let facade = self.facade.clone();
        object.set(
            "AddSchemas",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, schemas: Rest<Value<'js>>| -> rquickjs::Result<()> {
                    let mut decls = Vec::with_capacity(schemas.0.len());
                    for schema in schemas.0 {
                        let value = guest::json(&ctx, schema)?;
                        let decl: SchemaDecl = serde_json::from_value(value)
                            .map_err(|e| guest::throw(&ctx, RuntimeError::DecodeError(e.to_string())))?;
                        decls.push(decl);
                    }
                    facade.add_schemas(decls);
                    Ok(())
                },
            )?,
        )?;

        for event in HookEvent::ALL {
            let hooks = Arc::clone(&self.facade.hooks);
            let scope = self.scope.clone();
            let method = event.registration_method();
            object.set(
                method.as_str(),
                Function::new(
                    ctx.clone(),
                    move |ctx: Ctx<'js>, handler: Value<'js>| -> rquickjs::Result<()> {
                        let function = resolve_handler(&scope.pool, &scope.program, &handler)
                            .map_err(|e| guest::throw(&ctx, e))?;
                        hooks.register(HookAdapter {
                            event,
                            function,
                            plugin: scope.name.clone(),
                        });
                        Ok(())
                    },
                )?,
            )?;
        }

        Ok(object.into_value())
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
    use quill_runtime::Pool;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Settings {
        title: String,
        page: Page,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Page {
        size: u32,
        sticky: bool,
    }

    fn facade() -> ConfigFacade<Settings> {
        let record = Settings {
            title: "blog".into(),
            page: Page { size: 10, sticky: false },
        };
        let hooks = Arc::new(HookRegistry::new(Arc::new(Pool::default())));
        ConfigFacade::new(Arc::new(RwLock::new(record)), hooks)
    }

    #[test]
    fn test_set_merges_nested_fields() {
        let facade = facade();
        facade.set(&json!({ "page": { "size": 25 } })).unwrap();

        let record = read(facade.record()).clone();
        assert_eq!(record.page, Page { size: 25, sticky: false });
        assert_eq!(record.title, "blog");
    }

    #[test]
    fn test_type_mismatch_leaves_record_unchanged() {
        let facade = facade();
        let err = facade.set(&json!({ "page": { "size": "big" } })).unwrap_err();
        assert!(matches!(err, RuntimeError::DecodeError(_)));
        assert_eq!(read(facade.record()).page.size, 10);

        assert!(facade.set(&json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_validator_rejects_patch() {
        let facade = facade().with_validator(|s: &Settings| {
            if s.page.size == 0 {
                Err("page size must be positive".to_string())
            } else {
                Ok(())
            }
        });
        let err = facade.set(&json!({ "page": { "size": 0 } })).unwrap_err();
        assert!(err.to_string().contains("page size must be positive"));
        assert_eq!(read(facade.record()).page.size, 10);
    }

    #[test]
    fn test_add_schemas_keeps_declaration() {
        let facade = facade();
        let decl: SchemaDecl = serde_json::from_value(json!({ "name": "post", "fields": { "title": "string" } })).unwrap();
        facade.add_schemas(vec![decl]);

        let schemas = facade.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "post");
        assert_eq!(schemas[0].definition["fields"], json!({ "title": "string" }));
    }
}
