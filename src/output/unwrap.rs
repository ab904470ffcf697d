//! Unwrapping of the engine's nullable-scalar wrapper objects.
//!
//! The engine encodes possibly-NULL scalars as `{"String": "x", "Valid": true}`
//! (also `Int64` and `Float64`). No wrapper may survive into a result.

use super::Record;
use serde_json::{Map, Value};

const VALID_KEY: &str = "Valid";
const TYPED_KEYS: [&str; 3] = ["String", "Int64", "Float64"];

/// Recursively replaces every nullable-scalar wrapper in `value`.
pub fn unwrap_nullable(value: Value) -> Value {
    match value {
        Value::Object(map) => match as_wrapper(&map) {
            Some(resolved) => resolved,
            None => Value::Object(unwrap_record(map)),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(unwrap_nullable).collect()),
        other => other,
    }
}

/// Unwraps every value in a record.
pub fn unwrap_record(record: Record) -> Record {
    record
        .into_iter()
        .map(|(k, v)| (k, unwrap_nullable(v)))
        .collect()
}

/// Resolves `map` if it is a wrapper: exactly `Valid` plus at most one typed key.
fn as_wrapper(map: &Map<String, Value>) -> Option<Value> {
    let valid = map.get(VALID_KEY)?.as_bool()?;

    let mut typed = None;
    for key in map.keys().filter(|k| k.as_str() != VALID_KEY) {
        if !TYPED_KEYS.contains(&key.as_str()) || typed.is_some() {
            return None;
        }
        typed = Some(key);
    }

    if !valid {
        return Some(Value::Null);
    }
    Some(typed.and_then(|k| map.get(k)).cloned().unwrap_or(Value::Null))
}
