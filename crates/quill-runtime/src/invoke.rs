//! Invoking named guest functions.
//!
//! A call borrows one context from the sub-pool for
//! `(program, function, global names)`, looks the function up, passes the
//! marshaled arguments, waits for a returned promise to settle and
//! converts the result back to JSON. The context goes back to its pool on
//! every exit path.

use crate::error::{RuntimeError, RuntimeResult};
use crate::globals::Globals;
use crate::marshal::{js_to_json, IntoGuest};
use crate::pool::Pool;
use crate::program::Program;
use crate::resolve::is_identifier;
use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{CatchResultExt, CaughtError, Ctx, Function, Value};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::trace;

/// A call argument: any host value that can be installed into a context.
pub type GuestArg = Arc<dyn IntoGuest>;

/// Wrap a host value as a call argument.
pub fn arg<T>(value: T) -> GuestArg
where
    T: IntoGuest + 'static,
{
    Arc::new(value)
}

/// Wrap JSON values as call arguments.
pub fn json_args<I>(values: I) -> Vec<GuestArg>
where
    I: IntoIterator<Item = JsonValue>,
{
    values.into_iter().map(arg).collect()
}

/// Call `name` in `program` inside a pooled context.
///
/// Contexts are warmed with `globals` when the sub-pool creates them.
pub fn call_function(
    pool: &Pool,
    program: &Arc<Program>,
    name: &str,
    globals: &Globals,
    args: &[GuestArg],
) -> RuntimeResult<JsonValue> {
    let subpool = pool.subpool(program, name, globals);
    let lease = subpool.checkout()?;
    trace!(program = %program.identity(), function = %name, args = args.len(), "Invoking guest function");

    lease.with(|ctx| {
        let func = lookup_function(&ctx, program.identity(), name)?;

        let mut values = Vec::with_capacity(args.len());
        for a in args {
            let value = a
                .into_guest(&ctx)
                .catch(&ctx)
                .map_err(|e| RuntimeError::GuestException(describe(e)))?;
            values.push(value);
        }

        let raw: Value = func
            .call((Rest(values),))
            .catch(&ctx)
            .map_err(|e| RuntimeError::GuestException(describe(e)))?;
        let settled = settle(&ctx, raw)?;

        js_to_json(&ctx, settled)
            .catch(&ctx)
            .map_err(|e| RuntimeError::DecodeError(describe(e)))
    })
}

/// Look up `name` in the context's global scope and require it to be callable.
///
/// Lexical (`const`/`let`) top-level bindings are found as well as
/// function declarations.
pub fn lookup_function<'js>(ctx: &Ctx<'js>, program: &str, name: &str) -> RuntimeResult<Function<'js>> {
    if !is_identifier(name) {
        return Err(RuntimeError::InvalidFunctionName(name.to_string()));
    }

    let not_found = || RuntimeError::FunctionNotFound {
        program: program.to_string(),
        name: name.to_string(),
    };

    // `name` is a validated identifier, so it cannot inject code here.
    let expr = format!("typeof {name} === 'undefined' ? undefined : {name}");
    let value: Value = ctx.eval(expr).catch(ctx).map_err(|_| not_found())?;
    if value.is_undefined() {
        return Err(not_found());
    }

    value
        .into_function()
        .ok_or_else(|| RuntimeError::NotAFunction(name.to_string()))
}

/// Wait for a promise result to settle; other values pass through.
fn settle<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> RuntimeResult<Value<'js>> {
    if let Some(promise) = value.as_promise() {
        return match promise.finish::<Value>().catch(ctx) {
            Ok(settled) => Ok(settled),
            Err(CaughtError::Error(rquickjs::Error::WouldBlock)) => Err(RuntimeError::GuestException(
                "promise never settled: no pending jobs left".to_string(),
            )),
            Err(e) => Err(RuntimeError::GuestException(describe(e))),
        };
    }
    Ok(value)
}

/// Human-readable description of a caught guest error.
pub(crate) fn describe(err: CaughtError<'_>) -> String {
    match err {
        CaughtError::Exception(exception) => {
            let message = exception.message().unwrap_or_default();
            match exception.get::<_, Option<String>>("name").ok().flatten() {
                Some(name) if !name.is_empty() => format!("{name}: {message}"),
                _ => message,
            }
        }
        CaughtError::Value(value) => value
            .get::<Coerced<String>>()
            .map(|s| s.0)
            .unwrap_or_else(|_| "uncaught non-error value".to_string()),
        CaughtError::Error(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn program(source: &str) -> Arc<Program> {
        Program::compile("invoke-test", source).unwrap()
    }

    #[test]
    fn test_call_with_json_args() {
        let pool = Pool::default();
        let p = program("function add(a, b) { return { sum: a + b }; }");
        let result = call_function(&pool, &p, "add", &Globals::new(), &json_args([json!(2), json!(3)])).unwrap();
        assert_eq!(result, json!({ "sum": 5 }));
    }

    #[test]
    fn test_const_arrow_is_callable() {
        let pool = Pool::default();
        let p = program("const twice = (x) => x * 2;");
        let result = call_function(&pool, &p, "twice", &Globals::new(), &json_args([json!(21)])).unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn test_missing_function() {
        let pool = Pool::default();
        let p = program("function present() {}");
        let err = call_function(&pool, &p, "absent", &Globals::new(), &[]).unwrap_err();
        assert!(err.is_function_not_found());
    }

    #[test]
    fn test_non_callable_binding() {
        let pool = Pool::default();
        let p = program("var answer = 42;");
        let err = call_function(&pool, &p, "answer", &Globals::new(), &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::NotAFunction(_)));
    }

    #[test]
    fn test_thrown_error_is_guest_exception() {
        let pool = Pool::default();
        let p = program("function fail() { throw new TypeError('bad input'); }");
        let err = call_function(&pool, &p, "fail", &Globals::new(), &[]).unwrap_err();
        match err {
            RuntimeError::GuestException(message) => assert_eq!(message, "TypeError: bad input"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_context_released_after_exception() {
        let pool = Pool::default();
        let p = program("function fail() { throw 'nope'; }");
        for _ in 0..3 {
            assert!(call_function(&pool, &p, "fail", &Globals::new(), &[]).is_err());
        }
        let subpool = pool.subpool(&p, "fail", &Globals::new());
        assert_eq!(subpool.created(), 1);
        assert_eq!(subpool.idle(), 1);
    }

    #[test]
    fn test_never_settling_promise() {
        let pool = Pool::default();
        let p = program("function hang() { return new Promise(() => {}); }");
        let err = call_function(&pool, &p, "hang", &Globals::new(), &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::GuestException(_)));
    }

    #[test]
    fn test_undefined_result_is_null() {
        let pool = Pool::default();
        let p = program("function nothing() {}");
        let result = call_function(&pool, &p, "nothing", &Globals::new(), &[]).unwrap();
        assert_eq!(result, JsonValue::Null);
    }
}
