//! Quill host library
//!
//! This module exports the internal components of the host for testing purposes.

pub mod api;
pub mod config;
pub mod host;

pub use config::HostConfig;
pub use host::Host;
