//! Guest view of the resource tree.
//!
//! Every node object handed to guest code carries `id`, `name` and the
//! `Find`/`Group`/`Add` methods, and each of those returns another node
//! object, so navigation never leaves the façade.

use super::{Handler, NodeId, ResourceMeta, ResourceTree, Response};
use crate::guest;
use quill_runtime::rquickjs::function::Opt;
use quill_runtime::rquickjs::{self, Ctx, Function, Object, Value};
use quill_runtime::{arg, resolve_handler, FunctionRef, Globals, Pool, Program};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, error};

/// A handler that calls a guest function with the request as sole argument.
pub struct GuestHandler {
    function: FunctionRef,
    pool: Arc<Pool>,
    globals: Globals,
}

impl GuestHandler {
    /// Call `function` in `pool`, warming contexts with `globals`.
    pub fn new(function: FunctionRef, pool: Arc<Pool>, globals: Globals) -> Self {
        Self {
            function,
            pool,
            globals,
        }
    }

    /// The guest function.
    pub fn function(&self) -> &FunctionRef {
        &self.function
    }
}

impl Handler for GuestHandler {
    fn handle(&self, request: &JsonValue) -> Response {
        match self.function.call(&self.pool, &self.globals, &[arg(request.clone())]) {
            Ok(value) => Response::from_guest(value),
            Err(e) => {
                error!(
                    program = %self.function.program_identity(),
                    function = %self.function.name(),
                    "Handler failed: {}", e
                );
                Response::server_error(e.to_string())
            }
        }
    }
}

/// Host side of the resource façade for one plugin.
#[derive(Clone)]
pub struct ResourceFacade {
    tree: Arc<ResourceTree>,
    pool: Arc<Pool>,
    program: Arc<Program>,
    globals: Globals,
}

impl ResourceFacade {
    /// A façade registering handlers from `program` into `tree`.
    ///
    /// Handlers run with `globals` injected.
    pub fn new(tree: Arc<ResourceTree>, pool: Arc<Pool>, program: Arc<Program>, globals: Globals) -> Self {
        Self {
            tree,
            pool,
            program,
            globals,
        }
    }

    /// Guest object for `id`.
    pub fn node_object<'js>(&self, ctx: &Ctx<'js>, id: NodeId) -> rquickjs::Result<Object<'js>> {
        let info = self
            .tree
            .node(id)
            .ok_or_else(|| guest::throw(ctx, format!("resource {id} does not exist")))?;

        let object = Object::new(ctx.clone())?;
        object.set("id", id.0 as f64)?;
        object.set("name", info.name.as_str())?;

        let this = self.clone();
        object.set(
            "Find",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, path: Value<'js>| -> rquickjs::Result<Value<'js>> {
                    let path = guest::string(&ctx, path, "resource path")?;
                    match this.tree.find(id, &path) {
                        Some(found) => Ok(this.node_object(&ctx, found)?.into_value()),
                        None => Ok(Value::new_null(ctx.clone())),
                    }
                },
            )?,
        )?;

        let this = self.clone();
        object.set(
            "Group",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, name: Value<'js>, meta: Opt<Value<'js>>| {
                    let name = guest::string(&ctx, name, "group name")?;
                    let meta = decode_meta(&ctx, meta.0)?;
                    let group = this
                        .tree
                        .group(id, &name, meta)
                        .ok_or_else(|| guest::throw(&ctx, format!("resource {id} does not exist")))?;
                    this.node_object(&ctx, group)
                },
            )?,
        )?;

        let this = self.clone();
        object.set(
            "Add",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, handler: Value<'js>, meta: Opt<Value<'js>>| {
                    let meta = decode_meta(&ctx, meta.0)?;
                    let function = resolve_handler(&this.pool, &this.program, &handler)
                        .map_err(|e| guest::throw(&ctx, e))?;
                    let name = meta.name.clone().unwrap_or_else(|| function.name().to_string());
                    debug!(program = %function.program_identity(), function = %function.name(), "Adding guest handler");

                    let handler = GuestHandler::new(function, Arc::clone(&this.pool), this.globals.clone());
                    let leaf = this
                        .tree
                        .add(id, &name, Arc::new(handler), meta)
                        .ok_or_else(|| guest::throw(&ctx, format!("resource {id} does not exist")))?;
                    this.node_object(&ctx, leaf)
                },
            )?,
        )?;

        Ok(object)
    }
}

fn decode_meta<'js>(ctx: &Ctx<'js>, meta: Option<Value<'js>>) -> rquickjs::Result<ResourceMeta> {
    let Some(meta) = meta else {
        return Ok(ResourceMeta::default());
    };
    match guest::json(ctx, meta)? {
        JsonValue::Null => Ok(ResourceMeta::default()),
        value => serde_json::from_value(value).map_err(|e| guest::throw(ctx, format!("invalid resource meta: {e}"))),
    }
}
