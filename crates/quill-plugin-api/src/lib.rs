//! # quill-plugin-api
//!
//! Bridge between the quill runtime and the host application.
//!
//! This crate provides:
//!
//! - The [`Plugin`] lifecycle (`Config`, then `Init`) and the [`Manager`]
//!   driving it across all discovered plugins
//! - The configuration façade: config patches, schemas and hook registration
//! - The resource façade over the host's arena resource tree
//! - The persistence façade over a [`Persistence`] collaborator
//! - The [`HookRegistry`] firing guest hooks around host events
//!
//! ## Plugin Development
//!
//! ```js
//! function Config(config) {
//!     config.AddSchemas({ name: "post" });
//!     config.OnPreCreate((ctx, schema, values) => {
//!         if (!values.title) throw new Error("title is required");
//!     });
//! }
//!
//! function Init(init) {
//!     init.resource.Group("posts").Add(function list(request) {
//!         return db().Builder("post").Get(context());
//!     });
//! }
//! ```

mod ambient;
pub mod config;
mod guest;
pub mod hooks;
pub mod init;
pub mod manager;
pub mod persistence;
pub mod plugin;
pub mod resource;

pub use ambient::{ambient_globals, HostContext};
pub use config::{ConfigFacade, SchemaDecl, Validator};
pub use hooks::{HookAdapter, HookArgs, HookEvent, HookRegistry};
pub use init::InitFacade;
pub use manager::{Manager, PluginInfo};
pub use persistence::{
    Filter, HookedPersistence, MemoryStore, Persistence, PersistenceError, PersistenceFacade, PersistenceResult,
    QuerySpec, Transaction,
};
pub use plugin::{Facade, FacadeBinding, Plugin, PluginScope, PluginState};
pub use resource::{
    GuestHandler, Handler, NodeId, NodeInfo, RawResponse, ResourceFacade, ResourceMeta, ResourceTree, Response,
    Route, Visibility,
};
