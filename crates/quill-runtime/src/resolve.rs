//! Resolving guest function values to named, callable references.
//!
//! Guest code hands functions to the host (`config.OnPreCreate(fn)`,
//! `group.Add(fn)`), but a function value only lives inside the context
//! that produced it. The host keeps a [`FunctionRef`] instead: a name
//! plus the program that declares it, which any pooled context can look up
//! again later.

use crate::error::{RuntimeError, RuntimeResult};
use crate::globals::Globals;
use crate::invoke::{call_function, lookup_function, GuestArg};
use crate::pool::Pool;
use crate::program::Program;
use crate::rewrite::rewrite;
use regex::Regex;
use rquickjs::convert::Coerced;
use rquickjs::{Object, Value};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Property holding the host-assigned name of a hoisted function.
pub const SYNTHETIC_NAME_FIELD: &str = "__quillName";

/// Prefix of host-assigned function names.
pub const SYNTHETIC_NAME_PREFIX: &str = "__quill_fn_";

static NEXT_SYNTHETIC: AtomicUsize = AtomicUsize::new(1);

fn identifier_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").ok()).as_ref()
}

/// Whether `name` is a valid guest identifier.
pub fn is_identifier(name: &str) -> bool {
    identifier_regex().is_some_and(|re| re.is_match(name))
}

/// A named callable unit inside a program.
#[derive(Clone)]
pub struct FunctionRef {
    name: String,
    program: Arc<Program>,
}

impl FunctionRef {
    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program that declares the function.
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Identity of the declaring program.
    pub fn program_identity(&self) -> &str {
        self.program.identity()
    }

    /// Invoke the function in a pooled context.
    pub fn call(&self, pool: &Pool, globals: &Globals, args: &[GuestArg]) -> RuntimeResult<JsonValue> {
        call_function(pool, &self.program, &self.name, globals, args)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRef")
            .field("name", &self.name)
            .field("program", &self.program.identity())
            .finish()
    }
}

/// Determine the name a guest value should be resolved under.
///
/// The synthetic-name field wins over the function's own name. Values that
/// are not objects are rejected as `NotAFunction`; objects without any name
/// as `AnonymousFunction`.
pub fn candidate_name(value: &Value<'_>) -> RuntimeResult<String> {
    let Some(object) = value.as_object() else {
        return Err(RuntimeError::NotAFunction(format!("{} value", value.type_of().as_str())));
    };

    let name = match string_field(object, SYNTHETIC_NAME_FIELD)? {
        Some(name) => name,
        None if value.is_function() => match string_field(object, "name")? {
            Some(name) if !name.is_empty() => name,
            _ => return Err(RuntimeError::AnonymousFunction),
        },
        None => return Err(RuntimeError::AnonymousFunction),
    };

    if name.is_empty() || !is_identifier(&name) {
        return Err(RuntimeError::InvalidFunctionName(name));
    }
    Ok(name)
}

fn string_field(object: &Object<'_>, key: &str) -> RuntimeResult<Option<String>> {
    let value: Value = object
        .get(key)
        .map_err(|e| RuntimeError::GuestException(e.to_string()))?;
    match value.as_string() {
        Some(s) => s
            .to_string()
            .map(Some)
            .map_err(|e| RuntimeError::GuestException(e.to_string())),
        None => Ok(None),
    }
}

/// Resolve a guest value to a function declared by `program`.
///
/// The name is verified in a fresh context of the program: it must exist
/// there and be callable. The borrowed context goes back to the pool
/// unchanged.
pub fn resolve(pool: &Pool, program: &Arc<Program>, value: &Value<'_>) -> RuntimeResult<FunctionRef> {
    let name = candidate_name(value)?;

    let lease = pool.subpool(program, &name, &Globals::new()).checkout()?;
    lease.with(|ctx| lookup_function(&ctx, program.identity(), &name).map(|_| ()))?;

    Ok(FunctionRef {
        name,
        program: Arc::clone(program),
    })
}

/// Resolve a handler argument, hoisting inline functions first.
///
/// A function that cannot be found by name (anonymous, or a function
/// declared inside another function) is rewritten into a top-level
/// declaration of a synthetic name, compiled into a program derived from
/// `program`, tagged with that name and then resolved as usual. Hoisted
/// functions only see the program's globals, not the scope they were
/// written in.
pub fn resolve_handler(pool: &Pool, program: &Arc<Program>, value: &Value<'_>) -> RuntimeResult<FunctionRef> {
    match resolve(pool, program, value) {
        Err(RuntimeError::AnonymousFunction) if value.is_function() => hoist(pool, program, value),
        Err(err) if err.is_function_not_found() && value.is_function() => hoist(pool, program, value),
        other => other,
    }
}

fn hoist(pool: &Pool, program: &Arc<Program>, value: &Value<'_>) -> RuntimeResult<FunctionRef> {
    let source = value
        .get::<Coerced<String>>()
        .map_err(|e| RuntimeError::GuestException(e.to_string()))?
        .0;

    let name = format!(
        "{}{}",
        SYNTHETIC_NAME_PREFIX,
        NEXT_SYNTHETIC.fetch_add(1, Ordering::SeqCst)
    );
    let declaration = rewrite(&source, &name);
    let derived = program.derive(&name, &declaration)?;
    debug!(program = %program.identity(), function = %name, "Hoisted inline function");

    if let Some(object) = value.as_object() {
        object
            .set(SYNTHETIC_NAME_FIELD, name.as_str())
            .map_err(|e| RuntimeError::GuestException(e.to_string()))?;
    }

    resolve(pool, &derived, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_grammar() {
        assert!(identifier_regex().is_some());
        for ok in ["a", "_private", "$el", "Config", "x1", "__quill_fn_3"] {
            assert!(is_identifier(ok), "{ok}");
        }
        for bad in ["", "1x", "a-b", "a b", "a.b", "é"] {
            assert!(!is_identifier(bad), "{bad}");
        }
    }
}
