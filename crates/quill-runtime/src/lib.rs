//! # quill-runtime
//!
//! Embedded JavaScript runtime for executing quill plugins.
//!
//! This crate provides:
//! - Plugin discovery and manifest parsing
//! - Compiled, immutable [`Program`]s
//! - A partitioned [`Pool`] of warm execution contexts
//! - Named-function invocation with promise settlement
//! - Resolution of guest function values to [`FunctionRef`]s
//!
//! ## Plugin Structure
//!
//! Plugins are directories under a root directory containing:
//! - `index.js` - Entry script (the file name is configurable)
//! - `manifest.toml` - Optional metadata
//!
//! ## Execution Model
//!
//! Every guest call borrows one execution context exclusively from the
//! sub-pool for `(program, function, injected global names)`. A context
//! evaluates its program's source and installs its globals once, when it
//! is created, and is then reused by later calls with the same key.

mod ambient;
pub mod discovery;
pub mod error;
pub mod globals;
pub mod invoke;
pub mod manifest;
pub mod marshal;
pub mod pool;
pub mod program;
pub mod resolve;
pub mod rewrite;

pub use discovery::{discover_plugin, discover_plugins, PluginPath, DEFAULT_ENTRY};
pub use error::{RuntimeError, RuntimeResult};
pub use globals::Globals;
pub use invoke::{arg, call_function, json_args, lookup_function, GuestArg};
pub use manifest::{PluginManifest, PluginMetadata};
pub use marshal::{from_guest, js_to_json, json_to_js, IntoGuest};
pub use pool::{ExecutionContext, Lease, Pool, PoolConfig, PoolKey, Subpool};
pub use program::Program;
pub use resolve::{candidate_name, is_identifier, resolve, resolve_handler, FunctionRef};
pub use rewrite::rewrite;

/// Re-export of the embedded engine for host objects implementing [`IntoGuest`].
pub use rquickjs;
