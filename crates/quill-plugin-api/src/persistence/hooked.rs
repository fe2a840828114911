//! Hook firing around a persistence collaborator.
//!
//! A failing pre-hook aborts the operation before it reaches the
//! collaborator. A failing post-hook is reported after the operation has
//! already taken effect. Reads through the builder (`select`, `count`)
//! fire no hooks.

use super::{Filter, Persistence, PersistenceResult, QuerySpec, Transaction};
use crate::hooks::{HookArgs, HookRegistry};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A collaborator whose mutations and raw statements fire hooks.
pub struct HookedPersistence {
    inner: Arc<dyn Persistence>,
    hooks: Arc<HookRegistry>,
}

impl HookedPersistence {
    /// Wrap `inner`, firing events on `hooks`.
    pub fn new(inner: Arc<dyn Persistence>, hooks: Arc<HookRegistry>) -> Self {
        Self { inner, hooks }
    }

    fn hooked(&self) -> Hooked<'_> {
        Hooked {
            inner: self.inner.as_ref(),
            hooks: &self.hooks,
        }
    }
}

/// A transaction of a [`HookedPersistence`]; fires the same hooks.
pub struct HookedTransaction {
    inner: Arc<dyn Transaction>,
    hooks: Arc<HookRegistry>,
}

impl HookedTransaction {
    fn hooked(&self) -> Hooked<'_> {
        Hooked {
            inner: self.inner.as_persistence(),
            hooks: &self.hooks,
        }
    }
}

struct Hooked<'a> {
    inner: &'a dyn Persistence,
    hooks: &'a HookRegistry,
}

impl Hooked<'_> {
    fn query(&self, ctx: &JsonValue, sql: &str, args: &[JsonValue]) -> PersistenceResult<Vec<JsonValue>> {
        self.hooks.fire(&HookArgs::PreQuery {
            ctx: ctx.clone(),
            sql: sql.to_string(),
            args: args.to_vec(),
        })?;
        let rows = self.inner.query(ctx, sql, args)?;
        self.hooks.fire(&HookArgs::PostQuery {
            ctx: ctx.clone(),
            sql: sql.to_string(),
            args: args.to_vec(),
            rows: rows.clone(),
        })?;
        Ok(rows)
    }

    fn exec(&self, ctx: &JsonValue, sql: &str, args: &[JsonValue]) -> PersistenceResult<u64> {
        self.hooks.fire(&HookArgs::PreExec {
            ctx: ctx.clone(),
            sql: sql.to_string(),
            args: args.to_vec(),
        })?;
        let affected = self.inner.exec(ctx, sql, args)?;
        self.hooks.fire(&HookArgs::PostExec {
            ctx: ctx.clone(),
            sql: sql.to_string(),
            args: args.to_vec(),
            affected,
        })?;
        Ok(affected)
    }

    fn create(&self, ctx: &JsonValue, schema: &str, values: &Filter) -> PersistenceResult<JsonValue> {
        self.hooks.fire(&HookArgs::PreCreate {
            ctx: ctx.clone(),
            schema: schema.to_string(),
            values: values.clone(),
        })?;
        let created = self.inner.create(ctx, schema, values)?;
        self.hooks.fire(&HookArgs::PostCreate {
            ctx: ctx.clone(),
            schema: schema.to_string(),
            values: values.clone(),
            created: created.clone(),
        })?;
        Ok(created)
    }

    fn update(&self, ctx: &JsonValue, spec: &QuerySpec, values: &Filter) -> PersistenceResult<u64> {
        self.hooks.fire(&HookArgs::PreUpdate {
            ctx: ctx.clone(),
            schema: spec.schema.clone(),
            predicates: spec.filters.clone(),
            values: values.clone(),
        })?;
        let affected = self.inner.update(ctx, spec, values)?;
        self.hooks.fire(&HookArgs::PostUpdate {
            ctx: ctx.clone(),
            schema: spec.schema.clone(),
            predicates: spec.filters.clone(),
            values: values.clone(),
            affected,
        })?;
        Ok(affected)
    }

    fn delete(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64> {
        self.hooks.fire(&HookArgs::PreDelete {
            ctx: ctx.clone(),
            schema: spec.schema.clone(),
            predicates: spec.filters.clone(),
        })?;
        let affected = self.inner.delete(ctx, spec)?;
        self.hooks.fire(&HookArgs::PostDelete {
            ctx: ctx.clone(),
            schema: spec.schema.clone(),
            predicates: spec.filters.clone(),
            affected,
        })?;
        Ok(affected)
    }
}

impl Persistence for HookedPersistence {
    fn query(&self, ctx: &JsonValue, sql: &str, args: &[JsonValue]) -> PersistenceResult<Vec<JsonValue>> {
        self.hooked().query(ctx, sql, args)
    }

    fn exec(&self, ctx: &JsonValue, sql: &str, args: &[JsonValue]) -> PersistenceResult<u64> {
        self.hooked().exec(ctx, sql, args)
    }

    fn create(&self, ctx: &JsonValue, schema: &str, values: &Filter) -> PersistenceResult<JsonValue> {
        self.hooked().create(ctx, schema, values)
    }

    fn select(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<Vec<JsonValue>> {
        self.inner.select(ctx, spec)
    }

    fn count(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64> {
        self.inner.count(ctx, spec)
    }

    fn update(&self, ctx: &JsonValue, spec: &QuerySpec, values: &Filter) -> PersistenceResult<u64> {
        self.hooked().update(ctx, spec, values)
    }

    fn delete(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64> {
        self.hooked().delete(ctx, spec)
    }

    fn begin(&self, ctx: &JsonValue) -> PersistenceResult<Arc<dyn Transaction>> {
        let inner = self.inner.begin(ctx)?;
        Ok(Arc::new(HookedTransaction {
            inner,
            hooks: Arc::clone(&self.hooks),
        }))
    }
}

impl Persistence for HookedTransaction {
    fn query(&self, ctx: &JsonValue, sql: &str, args: &[JsonValue]) -> PersistenceResult<Vec<JsonValue>> {
        self.hooked().query(ctx, sql, args)
    }

    fn exec(&self, ctx: &JsonValue, sql: &str, args: &[JsonValue]) -> PersistenceResult<u64> {
        self.hooked().exec(ctx, sql, args)
    }

    fn create(&self, ctx: &JsonValue, schema: &str, values: &Filter) -> PersistenceResult<JsonValue> {
        self.hooked().create(ctx, schema, values)
    }

    fn select(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<Vec<JsonValue>> {
        self.inner.select(ctx, spec)
    }

    fn count(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64> {
        self.inner.count(ctx, spec)
    }

    fn update(&self, ctx: &JsonValue, spec: &QuerySpec, values: &Filter) -> PersistenceResult<u64> {
        self.hooked().update(ctx, spec, values)
    }

    fn delete(&self, ctx: &JsonValue, spec: &QuerySpec) -> PersistenceResult<u64> {
        self.hooked().delete(ctx, spec)
    }

    fn begin(&self, ctx: &JsonValue) -> PersistenceResult<Arc<dyn Transaction>> {
        let inner = self.inner.begin(ctx)?;
        Ok(Arc::new(HookedTransaction {
            inner,
            hooks: Arc::clone(&self.hooks),
        }))
    }
}

impl Transaction for HookedTransaction {
    fn as_persistence(&self) -> &dyn Persistence {
        self
    }

    fn commit(&self) -> PersistenceResult<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> PersistenceResult<()> {
        self.inner.rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use quill_runtime::Pool;
    use serde_json::json;

    #[test]
    fn test_without_hooks_forwards_unchanged() {
        let store = MemoryStore::new();
        store.define("post");
        let hooks = Arc::new(HookRegistry::new(Arc::new(Pool::default())));
        let hooked = HookedPersistence::new(Arc::new(store.clone()), hooks);

        let ctx = JsonValue::Null;
        let values = json!({ "title": "x" }).as_object().cloned().unwrap();
        hooked.create(&ctx, "post", &values).unwrap();
        assert_eq!(hooked.count(&ctx, &QuerySpec::new("post")).unwrap(), 1);

        let tx = hooked.begin(&ctx).unwrap();
        tx.delete(&ctx, &QuerySpec::new("post")).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count(&ctx, &QuerySpec::new("post")).unwrap(), 0);
    }

    #[test]
    fn test_collaborator_errors_pass_through() {
        let hooks = Arc::new(HookRegistry::new(Arc::new(Pool::default())));
        let hooked = HookedPersistence::new(Arc::new(MemoryStore::new()), hooks);
        let err = hooked.exec(&JsonValue::Null, "DELETE FROM post", &[]).unwrap_err();
        assert!(err.to_string().starts_with("Unsupported operation"));
    }
}
