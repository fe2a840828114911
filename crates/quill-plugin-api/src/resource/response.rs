//! Handler responses and the raw-response discriminator.
//!
//! A guest handler normally returns a value the host serializes as JSON.
//! Returning an object tagged `"$response": "raw"` bypasses that:
//!
//! ```js
//! return { "$response": "raw", status: 201, body: "created", headers: { "x-id": "7" } };
//! ```

use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Marker field of a raw response.
pub const RESPONSE_TAG: &str = "$response";

/// Marker value of a raw response.
pub const RAW_RESPONSE: &str = "raw";

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json";

/// A response bypassing default serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
}

/// Outcome of handling one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// A value for default JSON serialization.
    Json(JsonValue),
    /// A raw response produced through the discriminator.
    Raw(RawResponse),
    /// A routing or handler failure.
    Error { status: u16, message: String },
}

impl Response {
    /// Interpret a settled guest result.
    pub fn from_guest(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) if is_raw(&map) => Response::Raw(raw(map)),
            other => Response::Json(other),
        }
    }

    /// Not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Response::Error {
            status: 404,
            message: message.into(),
        }
    }

    /// Server error.
    pub fn server_error(message: impl Into<String>) -> Self {
        Response::Error {
            status: 500,
            message: message.into(),
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            Response::Json(_) => 200,
            Response::Raw(raw) => raw.status,
            Response::Error { status, .. } => *status,
        }
    }

    /// JSON description, as passed to `PostResolve` hooks.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Response::Json(body) => json!({ "status": 200, "body": body }),
            Response::Raw(raw) => json!({
                "status": raw.status,
                "body": String::from_utf8_lossy(&raw.body),
                "contentType": raw.content_type,
                "headers": raw.headers,
            }),
            Response::Error { status, message } => json!({ "status": status, "error": message }),
        }
    }
}

fn is_raw(map: &Map<String, JsonValue>) -> bool {
    map.get(RESPONSE_TAG).and_then(JsonValue::as_str) == Some(RAW_RESPONSE)
}

fn raw(mut map: Map<String, JsonValue>) -> RawResponse {
    let status = map
        .get("status")
        .and_then(JsonValue::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(200);

    let (body, default_type) = match map.remove("body") {
        Some(JsonValue::String(text)) => (text.into_bytes(), TEXT_CONTENT_TYPE),
        None | Some(JsonValue::Null) => (Vec::new(), TEXT_CONTENT_TYPE),
        Some(other) => (other.to_string().into_bytes(), JSON_CONTENT_TYPE),
    };

    let content_type = map
        .get("contentType")
        .and_then(JsonValue::as_str)
        .unwrap_or(default_type)
        .to_string();

    let headers = match map.get("headers") {
        Some(JsonValue::Object(headers)) => headers
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    RawResponse {
        status,
        body,
        content_type,
        headers,
    }
}
