//! The façade passed to a plugin's `Init` entry point.
//!
//! ```js
//! function Init(init) {
//!     const posts = init.resource.Group("api").Group("posts");
//!     posts.Add(listPosts);
//!     posts.Add((request) => db().Builder("post").Where({ id: Number(request.params.id) }).First(context()),
//!               { path: "/:id" });
//! }
//! ```
//!
//! Binding the façade also injects the ambient `context`, `logger` and
//! `db` globals, for `Init` itself and for every hook and handler of the
//! plugin afterwards.

use crate::ambient::ambient_globals;
use crate::hooks::HookRegistry;
use crate::persistence::Persistence;
use crate::plugin::{Facade, FacadeBinding, PluginScope};
use crate::resource::{NodeId, ResourceFacade, ResourceTree};
use quill_runtime::rquickjs::{self, Ctx, Object, Value};
use quill_runtime::IntoGuest;
use std::sync::Arc;

/// Host handle for the `Init` phase.
pub struct InitFacade {
    resources: Arc<ResourceTree>,
    persistence: Arc<dyn Persistence>,
    hooks: Arc<HookRegistry>,
}

impl InitFacade {
    /// Register resources into `resources`; `db()` reaches `persistence`.
    pub fn new(resources: Arc<ResourceTree>, persistence: Arc<dyn Persistence>, hooks: Arc<HookRegistry>) -> Self {
        Self {
            resources,
            persistence,
            hooks,
        }
    }
}

impl Facade for InitFacade {
    fn bind(&self, scope: &PluginScope) -> FacadeBinding {
        let globals = ambient_globals(&scope.name, &self.persistence);
        self.hooks.bind_ambient(scope.name.clone(), globals.clone());

        let resource = ResourceFacade::new(
            Arc::clone(&self.resources),
            Arc::clone(&scope.pool),
            Arc::clone(&scope.program),
            globals.clone(),
        );

        FacadeBinding {
            argument: Arc::new(InitBinding {
                name: scope.name.clone(),
                root: self.resources.root(),
                resource,
            }),
            globals,
        }
    }
}

struct InitBinding {
    name: String,
    root: NodeId,
    resource: ResourceFacade,
}

impl IntoGuest for InitBinding {
    fn into_guest<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let object = Object::new(ctx.clone())?;
        object.set("name", self.name.as_str())?;
        object.set("resource", self.resource.node_object(ctx, self.root)?)?;
        Ok(object.into_value())
    }
}
