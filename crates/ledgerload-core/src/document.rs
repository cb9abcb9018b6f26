//! Canonical document form and scalar-absence rules
//!
//! The wire surface of a load event is a structured document. Fingerprints
//! must be stable across field order and insignificant whitespace, so this
//! module defines one canonical serialization: object keys sorted bytewise,
//! arrays in order, no whitespace. Everything that hashes a document hashes
//! these bytes.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Object form of a structured document payload.
pub type JsonMap = Map<String, Value>;

/// Canonical textual serialization of a document.
pub fn canonical_text(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical serialization as bytes, for hashing.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    canonical_text(value).into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(s, out),
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
            // Sort keys regardless of the map's insertion order
            let sorted: BTreeMap<&str, &Value> =
                map.iter().map(|(k, v)| (k.as_str(), v)).collect();
            out.push('{');
            for (i, (key, item)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Scalar-absence rule for event fields: a typed null or an empty string is
/// treated as absent, and containers are not scalars.
pub fn scalar_or_absent(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::Object(_) | Value::Array(_) => None,
        other => Some(other.clone()),
    }
}

/// Trimmed, non-empty string or absent.
pub fn trimmed_or_absent(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
