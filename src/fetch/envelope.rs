//! Response Envelope Module
//!
//! Validates and normalizes upstream bodies into one canonical shape, so
//! downstream consumers always see `{get, parameters, errors, results,
//! paging, response}` with `response` as an array.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::Params;
use crate::error::{FetchError, Result};

// == Paging ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub current: u64,
    pub total: u64,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            current: 1,
            total: 1,
        }
    }
}

// == Envelope ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub get: String,
    pub parameters: Value,
    pub errors: Value,
    pub results: u64,
    pub paging: Paging,
    pub response: Vec<Value>,
}

/// Outcome of normalization; `decode_error` is set when the body had to be
/// replaced or repaired.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub envelope: Envelope,
    pub decode_error: Option<FetchError>,
}

impl Envelope {
    /// Canonical envelope with no items.
    pub fn empty(endpoint: &str, params: &Params) -> Self {
        Self {
            get: endpoint.to_string(),
            parameters: params_value(params),
            errors: Value::Array(Vec::new()),
            results: 0,
            paging: Paging::default(),
            response: Vec::new(),
        }
    }

    // == Normalize ==
    /// Parses an upstream body, repairing anything missing or ill-typed.
    pub fn normalize(endpoint: &str, params: &Params, body: &[u8]) -> Normalized {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                return Normalized {
                    envelope: Self::empty(endpoint, params),
                    decode_error: Some(FetchError::DecodingError(format!(
                        "body is not JSON: {}",
                        err
                    ))),
                }
            }
        };

        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Normalized {
                    envelope: Self::empty(endpoint, params),
                    decode_error: Some(FetchError::DecodingError(format!(
                        "expected an object, got {}",
                        kind(&other)
                    ))),
                }
            }
        };

        let mut decode_error = None;
        let response = match object.remove("response") {
            Some(Value::Array(items)) => items,
            Some(Value::Object(item)) => vec![Value::Object(item)],
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                decode_error = Some(FetchError::DecodingError(format!(
                    "response is {}",
                    kind(&other)
                )));
                Vec::new()
            }
        };

        let envelope = Self {
            get: take_string(&mut object, "get").unwrap_or_else(|| endpoint.to_string()),
            parameters: match object.remove("parameters") {
                Some(Value::Object(p)) => Value::Object(p),
                _ => params_value(params),
            },
            errors: match object.remove("errors") {
                Some(v @ Value::Array(_)) | Some(v @ Value::Object(_)) => v,
                _ => Value::Array(Vec::new()),
            },
            results: response.len() as u64,
            paging: object
                .remove("paging")
                .and_then(|p| serde_json::from_value(p).ok())
                .unwrap_or_default(),
            response,
        };

        Normalized {
            envelope,
            decode_error,
        }
    }

    /// Decodes an envelope previously written to the cache.
    pub fn from_cached(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| FetchError::Internal(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }

    // == Errors ==
    /// Messages reported in the `errors` field, either array or object form.
    pub fn error_messages(&self) -> Vec<String> {
        let render = |v: &Value| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match &self.errors {
            Value::Array(items) => items.iter().map(render).collect(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, render(v)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Quota message if the upstream reported a rate or daily-request limit.
    pub fn quota_message(&self) -> Option<String> {
        if let Value::Object(map) = &self.errors {
            if let Some(v) = map.get("rateLimit").or_else(|| map.get("requests")) {
                return Some(v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));
            }
        }
        self.error_messages().into_iter().find(|m| {
            let lower = m.to_ascii_lowercase();
            lower.contains("too many requests") || lower.contains("request limit")
        })
    }
}

// == Helpers ==
fn params_value(params: &Params) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<_, _>>(),
    )
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
