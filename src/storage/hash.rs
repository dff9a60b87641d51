//! Canonical serialization and content hashing
//!
//! Staged rows are identified by a deterministic digest of their payload.
//! Canonicalization sorts object keys recursively, so two payloads that
//! differ only in key order hash identically.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serializes a JSON value with all object keys sorted recursively
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json handles escaping; a String never fails to serialize
            out.push_str(&serde_json::to_string(s).expect("string serialization"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization"));
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// Computes the content hash of a payload (hex SHA-256 of the canonical form)
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// Derives the deduplication key for a payload
///
/// A single configured field uses its value directly; several fields are
/// digested together; no configured fields fall back to the content hash,
/// so every distinct payload is its own logical record.
pub fn dedup_key(value: &Value, keys: &[String]) -> String {
    match keys {
        [] => content_hash(value),
        [single] => field_string(value, single),
        many => {
            let mut hasher = Sha256::new();
            for (i, key) in many.iter().enumerate() {
                if i > 0 {
                    hasher.update([0x1f]);
                }
                hasher.update(field_string(value, key).as_bytes());
            }
            hex::encode(hasher.finalize())
        }
    }
}

fn field_string(value: &Value, key: &str) -> String {
    match value.get(key) {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => canonical_json(other),
    }
}
