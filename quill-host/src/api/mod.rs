//! JSON-RPC API module for quill-host.
//!
//! Exposes plugin routes and host introspection to clients over a JSON-RPC
//! interface via TCP.

pub mod handlers;
pub mod server;

pub use server::start_server;
