//! Deep Patch Merger
//!
//! Merges a partial state document into a live one, in place.
//!
//! # Algorithm
//!
//! For every key of the partial object:
//!
//! - both the existing value and the incoming one are objects: recurse
//! - anything else (arrays, scalars, null, a missing key): overwrite
//!
//! Arrays are replaced wholesale, never merged element by element. Keys the
//! partial does not mention stay untouched.

use serde_json::{Map, Value};

/// Whether `value` is a plain structured record, the only kind of value the
/// merger descends into.
pub fn is_plain_record(value: &Value) -> bool {
    value.is_object()
}

/// Short name of a value's JSON type, for error messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Merge `partial` into `target` and return `target`.
pub fn deep_merge<'a>(target: &'a mut Map<String, Value>, partial: &Map<String, Value>) -> &'a mut Map<String, Value> {
    for (key, incoming) in partial {
        let merged = match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(sub_patch)) => {
                deep_merge(existing, sub_patch);
                true
            }
            _ => false,
        };

        if !merged {
            target.insert(key.clone(), incoming.clone());
        }
    }
    target
}
