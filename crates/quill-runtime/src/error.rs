//! Error types for the quill runtime.

use thiserror::Error;

/// Errors that can occur in the quill runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A plugin script failed to compile.
    #[error("Failed to compile '{identity}': {message}")]
    CompileError { identity: String, message: String },

    /// A guest function value has no usable name.
    #[error("Anonymous function cannot be resolved")]
    AnonymousFunction,

    /// A guest function name does not match the identifier grammar.
    #[error("Invalid function name: '{0}'")]
    InvalidFunctionName(String),

    /// The named function does not exist in the program.
    #[error("Function '{name}' not found in '{program}'")]
    FunctionNotFound { program: String, name: String },

    /// The value (or the named binding) is not callable.
    #[error("Not a function: {0}")]
    NotAFunction(String),

    /// Uncaught guest exception or rejected promise.
    #[error("Guest exception: {0}")]
    GuestException(String),

    /// A guest value could not be decoded into a host record.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// An execution context could not be constructed.
    #[error("Failed to initialize execution context for '{identity}': {message}")]
    ContextInit { identity: String, message: String },

    /// Failed to parse plugin manifest.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Plugin not found at the specified path.
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// A lifecycle entry point was called out of order.
    #[error("Plugin '{plugin}' cannot run {phase} while {state}")]
    InvalidLifecycle {
        plugin: String,
        phase: &'static str,
        state: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RuntimeError {
    /// Whether this error reports a missing function.
    ///
    /// Lifecycle entry points treat this outcome as a no-op.
    pub fn is_function_not_found(&self) -> bool {
        matches!(self, RuntimeError::FunctionNotFound { .. })
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
