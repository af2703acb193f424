//! Type-preserving merge of JSON documents.
//!
//! For a key present on both sides:
//! - two lists are concatenated, primary first;
//! - two mappings are merged recursively with the same orientation;
//! - two scalars keep the primary value.
//!
//! A list meeting a non-list, or a mapping meeting a non-mapping, is a
//! [`Error::MergeConflict`]. Keys present on only one side are copied as-is.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Short name of a JSON value's type, for error messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// Merges `secondary` into `primary`.
pub fn merge_maps(primary: Map<String, Value>, secondary: Map<String, Value>) -> Result<Map<String, Value>> {
    merge_maps_at("", primary, secondary)
}

fn merge_maps_at(
    path: &str,
    mut primary: Map<String, Value>,
    secondary: Map<String, Value>,
) -> Result<Map<String, Value>> {
    for (key, incoming) in secondary {
        let key_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        let merged = match primary.remove(&key) {
            Some(existing) => merge_at(&key_path, existing, incoming)?,
            None => incoming,
        };
        primary.insert(key, merged);
    }
    Ok(primary)
}

/// Merges two values found under the same key.
pub fn merge_values(key: &str, primary: Value, secondary: Value) -> Result<Value> {
    merge_at(key, primary, secondary)
}

fn merge_at(path: &str, primary: Value, secondary: Value) -> Result<Value> {
    match (primary, secondary) {
        (Value::Array(mut first), Value::Array(second)) => {
            first.extend(second);
            Ok(Value::Array(first))
        }
        (Value::Object(first), Value::Object(second)) => {
            merge_maps_at(path, first, second).map(Value::Object)
        }
        (existing @ (Value::Array(_) | Value::Object(_)), incoming)
        | (existing, incoming @ (Value::Array(_) | Value::Object(_))) => {
            Err(Error::MergeConflict {
                key: path.to_string(),
                existing: kind_of(&existing),
                incoming: kind_of(&incoming),
            })
        }
        (existing, _) => Ok(existing),
    }
}
