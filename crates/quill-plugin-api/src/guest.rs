//! Helpers shared by the guest-facing façade objects.

use quill_runtime::js_to_json;
use quill_runtime::rquickjs::{self, Ctx, Exception, Value};
use serde_json::{Map, Value as JsonValue};
use std::fmt::Display;

/// Throw a host failure into the guest as an `Error`.
pub(crate) fn throw<'js>(ctx: &Ctx<'js>, err: impl Display) -> rquickjs::Error {
    Exception::throw_message(ctx, &err.to_string())
}

/// Convert a guest value to JSON.
pub(crate) fn json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<JsonValue> {
    js_to_json(ctx, value)
}

/// Convert a guest value to a JSON object; `undefined`/`null` give an empty map.
pub(crate) fn object<'js>(ctx: &Ctx<'js>, value: Value<'js>, what: &str) -> rquickjs::Result<Map<String, JsonValue>> {
    match js_to_json(ctx, value)? {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Null => Ok(Map::new()),
        other => Err(Exception::throw_type(
            ctx,
            &format!("{what} must be an object, got {other}"),
        )),
    }
}

/// Convert a guest value to a string.
pub(crate) fn string<'js>(ctx: &Ctx<'js>, value: Value<'js>, what: &str) -> rquickjs::Result<String> {
    match value.as_string() {
        Some(s) => s.to_string(),
        None => Err(Exception::throw_type(ctx, &format!("{what} must be a string"))),
    }
}

/// Convert a guest value to a non-negative count.
pub(crate) fn count<'js>(ctx: &Ctx<'js>, value: Value<'js>, what: &str) -> rquickjs::Result<usize> {
    match value.as_number() {
        Some(n) if n.is_finite() && n >= 0.0 => Ok(n as usize),
        _ => Err(Exception::throw_type(
            ctx,
            &format!("{what} must be a non-negative number"),
        )),
    }
}

/// Convert an optional guest array to a list of JSON values.
pub(crate) fn list<'js>(ctx: &Ctx<'js>, value: Option<Value<'js>>) -> rquickjs::Result<Vec<JsonValue>> {
    match value {
        None => Ok(Vec::new()),
        Some(value) => match js_to_json(ctx, value)? {
            JsonValue::Array(items) => Ok(items),
            JsonValue::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        },
    }
}
