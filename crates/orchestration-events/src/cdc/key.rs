//! Entity id extraction from change event keys.

use serde_json::Value;

use crate::error::{AppError, AppResult};

/// Extract the entity id from a serialized key.
///
/// Accepted shapes of `id`: a string, a number, or a string holding a
/// serialized `{"$oid": "..."}` document, in which case the oid is used.
pub fn parse_entity_id(key: &str) -> AppResult<String> {
    let parsed: Value = serde_json::from_str(key)
        .map_err(|e| AppError::MalformedKey(format!("key is not JSON: {}", e)))?;

    let id = parsed
        .get("id")
        .ok_or_else(|| AppError::MalformedKey(format!("key has no id: {}", key)))?;

    match id {
        Value::String(s) => Ok(unwrap_oid(s).unwrap_or_else(|| s.clone())),
        Value::Number(n) => Ok(n.to_string()),
        Value::Object(map) => match map.get("$oid") {
            Some(Value::String(oid)) => Ok(oid.clone()),
            _ => Err(AppError::MalformedKey(format!("unsupported id object: {}", key))),
        },
        _ => Err(AppError::MalformedKey(format!("unsupported id type: {}", key))),
    }
}

fn unwrap_oid(raw: &str) -> Option<String> {
    if !raw.trim_start().starts_with('{') {
        return None;
    }
    let inner: Value = serde_json::from_str(raw).ok()?;
    inner.get("$oid")?.as_str().map(str::to_string)
}
