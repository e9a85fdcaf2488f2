//! Record representation and field access helpers
//!
//! Records are JSON objects. Relations are modeled by integer foreign-key
//! fields (`host_id`, `cluster_id`, ...); the accessors here keep field
//! extraction in one place so the executor and lifecycle code stay terse.

use serde_json::{Map, Value};

/// A stored record: one row of a table
pub type Record = Map<String, Value>;

/// Primary key of a record, if assigned
pub fn record_id(record: &Record) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}

/// String field accessor; `None` for missing or non-string values
pub fn str_field<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Integer field accessor
pub fn i64_field(record: &Record, key: &str) -> Option<i64> {
    record.get(key).and_then(Value::as_i64)
}

/// Boolean field accessor; missing and null read as false
pub fn bool_field(record: &Record, key: &str) -> bool {
    record.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Deep-merge `patch` into `target`.
///
/// Objects merge key by key, recursively; any other value replaces the
/// target wholesale.
pub fn merge_values(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_values(existing, patch_value),
                    None => {
                        target_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (target_slot, _) => {
            *target_slot = patch.clone();
        }
    }
}
