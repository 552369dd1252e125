//! JSON wire format spoken with the gateway.
//!
//! - Request: `{"method": string, "params"?: object, "id"?: integer}`
//! - Success: `{"id": integer, "result": any}`
//! - Error: `{"id": integer, "error": string}`
//!
//! Anything else is a push and is forwarded untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_AUTH: &str = "auth";
pub const METHOD_PING: &str = "ping";

#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
}

/// Serialize a request; `id` is `None` for fire-and-forget sends.
pub fn encode_request(
    method: &str,
    params: Option<&Value>,
    id: Option<u64>,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RequestFrame { method, params, id })
}

/// A frame carrying an integer `id`, which may answer a pending call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub id: u64,
    pub outcome: Result<Value, String>,
}

/// Extract the correlation part of an inbound frame.
///
/// Returns `None` for frames that are not JSON objects with a non-negative
/// integer `id`; those can only be pushes.
pub fn parse_response(text: &str) -> Option<ResponseFrame> {
    let Value::Object(mut map) = serde_json::from_str::<Value>(text).ok()? else {
        return None;
    };
    let id = map.get("id")?.as_u64()?;

    let outcome = match map.remove("error") {
        Some(error) if is_set(&error) => Err(error_text(error)),
        _ => Ok(map.remove("result").unwrap_or(Value::Null)),
    };

    Some(ResponseFrame { id, outcome })
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn error_text(error: Value) -> String {
    match error {
        Value::String(s) => s,
        Value::Object(ref map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Result payload of the `auth` method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    #[serde(default)]
    pub authenticated: Option<bool>,
    #[serde(default)]
    pub connect_id: Option<String>,
}

impl AuthResult {
    /// Lenient decode: a missing or non-object result counts as an empty one.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// Only an explicit `authenticated: false` is a rejection.
    pub fn is_rejected(&self) -> bool {
        self.authenticated == Some(false)
    }
}
