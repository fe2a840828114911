//! Compiled plugin programs.
//!
//! A [`Program`] is the immutable, syntax-checked source of one plugin
//! script. Execution contexts evaluate it once when they are created, so a
//! single `Arc<Program>` is shared read-only by every context in the pool.

use crate::error::{RuntimeError, RuntimeResult};
use rquickjs::{qjs, CatchResultExt, Context, Runtime};
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One compiled plugin script.
#[derive(Debug)]
pub struct Program {
    identity: String,
    source: Arc<str>,
    path: Option<PathBuf>,
}

impl Program {
    /// Compile `source` under the given identity.
    ///
    /// The source is parsed but not executed; top-level code runs when an
    /// execution context is first created for it.
    pub fn compile(identity: impl Into<String>, source: impl Into<String>) -> RuntimeResult<Arc<Self>> {
        Self::build(identity.into(), source.into(), None)
    }

    /// Read and compile a script file.
    pub fn load(identity: impl Into<String>, path: &Path) -> RuntimeResult<Arc<Self>> {
        let source = std::fs::read_to_string(path)?;
        Self::build(identity.into(), source, Some(path.to_path_buf()))
    }

    /// Derive a program that also declares `declaration` at top level.
    ///
    /// Used to make a hoisted inline function addressable by `name`.
    pub fn derive(&self, name: &str, declaration: &str) -> RuntimeResult<Arc<Self>> {
        let identity = format!("{}#{}", self.identity, name);
        let source = format!("{}\n;\n{}\n", self.source, declaration);
        Self::build(identity, source, self.path.clone())
    }

    fn build(identity: String, source: String, path: Option<PathBuf>) -> RuntimeResult<Arc<Self>> {
        check_syntax(&identity, &source)?;
        debug!(program = %identity, bytes = source.len(), "Compiled program");

        Ok(Arc::new(Self {
            identity,
            source: Arc::from(source),
            path,
        }))
    }

    /// Stable identity of this program (plugin name, or `plugin#fn` when derived).
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Full source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Script file this program was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn check_syntax(identity: &str, source: &str) -> RuntimeResult<()> {
    let compile_error = |message: String| RuntimeError::CompileError {
        identity: identity.to_string(),
        message,
    };

    let input = CString::new(source).map_err(|e| compile_error(e.to_string()))?;
    let file_name = CString::new(identity).map_err(|e| compile_error(e.to_string()))?;
    let rt = Runtime::new().map_err(|e| compile_error(e.to_string()))?;
    let context = Context::full(&rt).map_err(|e| compile_error(e.to_string()))?;

    context.with(|ctx| {
        let raw = ctx.as_raw().as_ptr();
        let flags = (qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY) as i32;

        // SAFETY: `raw` is the live context of this closure, both strings are
        // NUL-terminated and outlive the call, and the compiled function is
        // freed exactly once below.
        let compiled = unsafe {
            qjs::JS_Eval(
                raw,
                input.as_ptr(),
                input.as_bytes().len() as _,
                file_name.as_ptr(),
                flags,
            )
        };

        if unsafe { qjs::JS_IsException(compiled) } {
            return Err::<(), _>(rquickjs::Error::Exception)
                .catch(&ctx)
                .map_err(|e| compile_error(e.to_string()));
        }

        // SAFETY: `compiled` is an owned, non-exception value of this context.
        unsafe { qjs::JS_FreeValue(raw, compiled) };
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_valid_source() {
        let program = Program::compile("blog", "function Config(c) { return 1; }").unwrap();
        assert_eq!(program.identity(), "blog");
        assert!(program.source().contains("Config"));
        assert!(program.path().is_none());
    }

    #[test]
    fn test_compile_does_not_execute() {
        // Would throw if executed.
        assert!(Program::compile("lazy", "throw new Error('boom');").is_ok());
    }

    #[test]
    fn test_compile_syntax_error() {
        let err = Program::compile("broken", "function (").unwrap_err();
        match err {
            RuntimeError::CompileError { identity, .. } => assert_eq!(identity, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_compile_uses_script_grammar() {
        // Legal as a function body, not as a script.
        for source in ["return 1;", "return 1;\nfunction Config() {}"] {
            let err = Program::compile("p", source).unwrap_err();
            assert!(matches!(err, RuntimeError::CompileError { ref identity, .. } if identity == "p"), "{source}");
        }
    }

    #[test]
    fn test_compile_allows_top_level_declarations() {
        let source = "let seen = 0;\nconst limit = 3;\nasync function Init() { await null; }";
        assert!(Program::compile("decls", source).is_ok());
    }

    #[test]
    fn test_derive_appends_declaration() {
        let base = Program::compile("blog", "const prefix = 'p';").unwrap();
        let derived = base.derive("__quill_fn_1", "const __quill_fn_1 = (x) => prefix + x").unwrap();
        assert_eq!(derived.identity(), "blog#__quill_fn_1");
        assert!(derived.source().starts_with("const prefix"));
        assert!(derived.source().contains("const __quill_fn_1"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.js");
        std::fs::write(&path, "function Init() {}").unwrap();

        let program = Program::load("site", &path).unwrap();
        assert_eq!(program.path(), Some(path.as_path()));
    }
}
