//! Request body sanitization.

use serde_json::Value;

/// Drop object entries whose value is an empty or whitespace-only string,
/// at any depth. `{"vibe": {"title": "", "img": "a"}}` becomes
/// `{"vibe": {"img": "a"}}`.
pub fn remove_blank_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !matches!(v, Value::String(s) if s.trim().is_empty()))
                .map(|(k, v)| (k, remove_blank_fields(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(remove_blank_fields).collect()),
        other => other,
    }
}
