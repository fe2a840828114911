//! The guest-facing persistence object.
//!
//! ```js
//! const db = db();
//! const ctx = context();
//! db.Create(ctx, "post", { title: "Hello" });
//! const drafts = db.Builder("post").Where({ status: "draft" }).Limit(10).Get(ctx);
//!
//! const tx = db.Tx(ctx);
//! tx.Builder("post").Where({ id: 1 }).Delete(ctx);
//! tx.Commit();
//! ```
//!
//! Collaborator errors are thrown into the guest unchanged.

use super::{Persistence, QuerySpec, Transaction};
use crate::guest;
use quill_runtime::rquickjs::function::{Opt, Rest, This};
use quill_runtime::rquickjs::{self, Ctx, Function, Object, Value};
use quill_runtime::{json_to_js, IntoGuest};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Clone)]
enum Target {
    Base(Arc<dyn Persistence>),
    Tx(Arc<dyn Transaction>),
}

/// Host side of one guest persistence object.
#[derive(Clone)]
pub struct PersistenceFacade {
    target: Target,
}

impl PersistenceFacade {
    /// Façade over a collaborator outside any transaction.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            target: Target::Base(persistence),
        }
    }

    fn transaction(tx: Arc<dyn Transaction>) -> Self {
        Self {
            target: Target::Tx(tx),
        }
    }

    fn store(&self) -> &dyn Persistence {
        match &self.target {
            Target::Base(persistence) => persistence.as_ref(),
            Target::Tx(tx) => tx.as_persistence(),
        }
    }

    /// Build the guest object.
    pub fn into_object<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
        let object = Object::new(ctx.clone())?;

        let this = self.clone();
        object.set(
            "Query",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, host_ctx: Value<'js>, sql: Value<'js>, args: Opt<Value<'js>>| {
                    let host_ctx = guest::json(&ctx, host_ctx)?;
                    let sql = guest::string(&ctx, sql, "sql")?;
                    let args = guest::list(&ctx, args.0)?;
                    let rows = this
                        .store()
                        .query(&host_ctx, &sql, &args)
                        .map_err(|e| guest::throw(&ctx, e))?;
                    json_to_js(&ctx, &JsonValue::Array(rows))
                },
            )?,
        )?;

        let this = self.clone();
        object.set(
            "Exec",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, host_ctx: Value<'js>, sql: Value<'js>, args: Opt<Value<'js>>| {
                    let host_ctx = guest::json(&ctx, host_ctx)?;
                    let sql = guest::string(&ctx, sql, "sql")?;
                    let args = guest::list(&ctx, args.0)?;
                    this.store()
                        .exec(&host_ctx, &sql, &args)
                        .map(|affected| affected as f64)
                        .map_err(|e| guest::throw(&ctx, e))
                },
            )?,
        )?;

        let this = self.clone();
        object.set(
            "Create",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, host_ctx: Value<'js>, schema: Value<'js>, values: Value<'js>| {
                    let host_ctx = guest::json(&ctx, host_ctx)?;
                    let schema = guest::string(&ctx, schema, "schema")?;
                    let values = guest::object(&ctx, values, "values")?;
                    let created = this
                        .store()
                        .create(&host_ctx, &schema, &values)
                        .map_err(|e| guest::throw(&ctx, e))?;
                    json_to_js(&ctx, &created)
                },
            )?,
        )?;

        let this = self.clone();
        object.set(
            "Builder",
            Function::new(ctx.clone(), move |ctx: Ctx<'js>, schema: Value<'js>| {
                let schema = guest::string(&ctx, schema, "schema")?;
                builder(&ctx, this.clone(), QuerySpec::new(schema))
            })?,
        )?;

        let this = self.clone();
        object.set(
            "Tx",
            Function::new(ctx.clone(), move |ctx: Ctx<'js>, host_ctx: Value<'js>| {
                let host_ctx = guest::json(&ctx, host_ctx)?;
                let tx = this.store().begin(&host_ctx).map_err(|e| guest::throw(&ctx, e))?;
                PersistenceFacade::transaction(tx).into_object(&ctx)
            })?,
        )?;

        let this = self.clone();
        object.set(
            "Commit",
            Function::new(ctx.clone(), move |ctx: Ctx<'js>| match &this.target {
                Target::Tx(tx) => tx.commit().map_err(|e| guest::throw(&ctx, e)),
                Target::Base(_) => Err(guest::throw(&ctx, "Commit called outside a transaction")),
            })?,
        )?;

        let this = self.clone();
        object.set(
            "Rollback",
            Function::new(ctx.clone(), move |ctx: Ctx<'js>| match &this.target {
                Target::Tx(tx) => tx.rollback().map_err(|e| guest::throw(&ctx, e)),
                Target::Base(_) => Err(guest::throw(&ctx, "Rollback called outside a transaction")),
            })?,
        )?;

        Ok(object)
    }
}

fn lock(spec: &Mutex<QuerySpec>) -> MutexGuard<'_, QuerySpec> {
    spec.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build a chainable query builder for `spec`.
///
/// Chain methods update the builder and return it; terminal methods take
/// the host context and run the query.
fn builder<'js>(ctx: &Ctx<'js>, facade: PersistenceFacade, spec: QuerySpec) -> rquickjs::Result<Object<'js>> {
    let object = Object::new(ctx.clone())?;
    let spec = Arc::new(Mutex::new(spec));

    let state = Arc::clone(&spec);
    object.set(
        "Where",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, this: This<Object<'js>>, filters: Rest<Value<'js>>| {
                for filter in filters.0 {
                    let filter = guest::object(&ctx, filter, "filter")?;
                    lock(&state).filters.push(filter);
                }
                Ok::<_, rquickjs::Error>(this.0)
            },
        )?,
    )?;

    let state = Arc::clone(&spec);
    object.set(
        "Limit",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, this: This<Object<'js>>, n: Value<'js>| {
                lock(&state).limit = Some(guest::count(&ctx, n, "limit")?);
                Ok::<_, rquickjs::Error>(this.0)
            },
        )?,
    )?;

    let state = Arc::clone(&spec);
    object.set(
        "Offset",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, this: This<Object<'js>>, n: Value<'js>| {
                lock(&state).offset = Some(guest::count(&ctx, n, "offset")?);
                Ok::<_, rquickjs::Error>(this.0)
            },
        )?,
    )?;

    let state = Arc::clone(&spec);
    object.set(
        "Select",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, this: This<Object<'js>>, fields: Rest<Value<'js>>| {
                for field in fields.0 {
                    let field = guest::string(&ctx, field, "field")?;
                    lock(&state).select.push(field);
                }
                Ok::<_, rquickjs::Error>(this.0)
            },
        )?,
    )?;

    let (state, store) = (Arc::clone(&spec), facade.clone());
    object.set(
        "Get",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, host_ctx: Value<'js>| {
            let host_ctx = guest::json(&ctx, host_ctx)?;
            let query = lock(&state).clone();
            let rows = store.store().select(&host_ctx, &query).map_err(|e| guest::throw(&ctx, e))?;
            json_to_js(&ctx, &JsonValue::Array(rows))
        })?,
    )?;

    let (state, store) = (Arc::clone(&spec), facade.clone());
    object.set(
        "First",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, host_ctx: Value<'js>| {
            let host_ctx = guest::json(&ctx, host_ctx)?;
            let mut query = lock(&state).clone();
            query.limit = Some(1);
            let rows = store.store().select(&host_ctx, &query).map_err(|e| guest::throw(&ctx, e))?;
            json_to_js(&ctx, rows.first().unwrap_or(&JsonValue::Null))
        })?,
    )?;

    let (state, store) = (Arc::clone(&spec), facade.clone());
    object.set(
        "Only",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, host_ctx: Value<'js>| {
            let host_ctx = guest::json(&ctx, host_ctx)?;
            let query = lock(&state).clone();
            let rows = store.store().select(&host_ctx, &query).map_err(|e| guest::throw(&ctx, e))?;
            match rows.as_slice() {
                [row] => json_to_js(&ctx, row),
                _ => Err(guest::throw(&ctx, super::PersistenceError::NotSingular(rows.len()))),
            }
        })?,
    )?;

    let (state, store) = (Arc::clone(&spec), facade.clone());
    object.set(
        "Count",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, host_ctx: Value<'js>| {
            let host_ctx = guest::json(&ctx, host_ctx)?;
            let query = lock(&state).clone();
            store
                .store()
                .count(&host_ctx, &query)
                .map(|n| n as f64)
                .map_err(|e| guest::throw(&ctx, e))
        })?,
    )?;

    let (state, store) = (Arc::clone(&spec), facade.clone());
    object.set(
        "Update",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, host_ctx: Value<'js>, values: Value<'js>| {
                let host_ctx = guest::json(&ctx, host_ctx)?;
                let values = guest::object(&ctx, values, "values")?;
                let query = lock(&state).clone();
                store
                    .store()
                    .update(&host_ctx, &query, &values)
                    .map(|n| n as f64)
                    .map_err(|e| guest::throw(&ctx, e))
            },
        )?,
    )?;

    let (state, store) = (spec, facade);
    object.set(
        "Delete",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, host_ctx: Value<'js>| {
            let host_ctx = guest::json(&ctx, host_ctx)?;
            let query = lock(&state).clone();
            store
                .store()
                .delete(&host_ctx, &query)
                .map(|n| n as f64)
                .map_err(|e| guest::throw(&ctx, e))
        })?,
    )?;

    Ok(object)
}

/// The `db()` ambient binding.
///
/// Holds the collaborator weakly: execution contexts outlive lifecycle
/// phases, and the collaborator's hooks point back into the pool.
pub struct DbBinding {
    persistence: Weak<dyn Persistence>,
}

impl DbBinding {
    /// Bind `db()` to a collaborator.
    pub fn new(persistence: &Arc<dyn Persistence>) -> Self {
        Self {
            persistence: Arc::downgrade(persistence),
        }
    }
}

impl IntoGuest for DbBinding {
    fn into_guest<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let persistence = self.persistence.clone();
        let func = Function::new(ctx.clone(), move |ctx: Ctx<'js>| match persistence.upgrade() {
            Some(persistence) => PersistenceFacade::new(persistence).into_object(&ctx),
            None => Err(guest::throw(&ctx, "persistence is no longer available")),
        })?;
        Ok(func.into_value())
    }
}
