//! Marshaling between host values and guest values.
//!
//! Plain data crosses the boundary as `serde_json::Value`. Host objects
//! that carry behavior (façades, ambient bindings) implement [`IntoGuest`]
//! and build their guest representation directly inside the context.

use crate::error::{RuntimeError, RuntimeResult};
use rquickjs::{Ctx, IntoJs, Value};
use serde_json::Value as JsonValue;

/// A host value that can be installed into a guest context.
pub trait IntoGuest: Send + Sync {
    /// Build the guest representation of this value inside `ctx`.
    fn into_guest<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>>;
}

impl IntoGuest for JsonValue {
    fn into_guest<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        json_to_js(ctx, self)
    }
}

/// Convert a JSON value into a guest value.
pub fn json_to_js<'js>(ctx: &Ctx<'js>, value: &JsonValue) -> rquickjs::Result<Value<'js>> {
    match value {
        JsonValue::Null => Ok(Value::new_null(ctx.clone())),
        JsonValue::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        JsonValue::String(s) => s.as_str().into_js(ctx),
        other => {
            let text = serde_json::to_string(other)
                .map_err(|e| rquickjs::Error::new_from_js_message("json", "value", e.to_string()))?;
            ctx.json_parse(text)
        }
    }
}

/// Convert a guest value into JSON.
///
/// `undefined`, functions and symbols become `null`, matching what
/// `JSON.stringify` drops.
pub fn js_to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<JsonValue> {
    if value.is_undefined() || value.is_null() || value.is_function() || value.is_symbol() {
        return Ok(JsonValue::Null);
    }

    match ctx.json_stringify(value)? {
        Some(text) => {
            let text = text.to_string()?;
            serde_json::from_str(&text)
                .map_err(|e| rquickjs::Error::new_from_js_message("value", "json", e.to_string()))
        }
        None => Ok(JsonValue::Null),
    }
}

/// Decode a guest value into a typed host record.
pub fn from_guest<'js, T>(ctx: &Ctx<'js>, value: Value<'js>) -> RuntimeResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let json = js_to_json(ctx, value).map_err(|e| RuntimeError::DecodeError(e.to_string()))?;
    serde_json::from_value(json).map_err(|e| RuntimeError::DecodeError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};
    use serde_json::json;

    fn with_ctx<F>(f: F)
    where
        F: for<'js> FnOnce(Ctx<'js>),
    {
        let rt = Runtime::new().unwrap();
        let ctx = Context::full(&rt).unwrap();
        ctx.with(f);
    }

    #[test]
    fn test_object_crosses_boundary() {
        with_ctx(|ctx| {
            let input = json!({ "title": "hello", "tags": ["a", "b"], "count": 3 });
            let js = json_to_js(&ctx, &input).unwrap();
            assert!(js.is_object());
            let back = js_to_json(&ctx, js).unwrap();
            assert_eq!(back, input);
        });
    }

    #[test]
    fn test_undefined_becomes_null() {
        with_ctx(|ctx| {
            let value: Value = ctx.eval("undefined").unwrap();
            assert_eq!(js_to_json(&ctx, value).unwrap(), JsonValue::Null);
        });
    }

    #[test]
    fn test_functions_inside_objects_are_dropped() {
        with_ctx(|ctx| {
            let value: Value = ctx.eval("({ a: 1, f: function () {} })").unwrap();
            assert_eq!(js_to_json(&ctx, value).unwrap(), json!({ "a": 1 }));
        });
    }

    #[test]
    fn test_from_guest_reports_shape_mismatch() {
        #[derive(serde::Deserialize)]
        struct Limits {
            #[allow(dead_code)]
            max: u32,
        }

        with_ctx(|ctx| {
            let value: Value = ctx.eval("({ max: 'lots' })").unwrap();
            let err = from_guest::<Limits>(&ctx, value).err().unwrap();
            assert!(matches!(err, RuntimeError::DecodeError(_)));
        });
    }
}
