//! Tool-result cache keys.
//!
//! A cache key is the tool name, a `:`, and the canonical JSON of the input:
//! object keys sorted recursively, no whitespace, and floats with no
//! fractional part written as integers (`1.0` → `1`). Two inputs with the
//! same contents therefore share a key regardless of key order.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Largest integer an f64 represents exactly.
const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

/// Canonical serialization of a JSON value.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Cache key for a tool invocation.
pub fn tool_cache_key(tool_name: &str, input: &Value) -> String {
    format!("{tool_name}:{}", canonical_json(input))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        // Display on a string value yields the escaped, quoted form.
        Value::String(_) => {
            let _ = write!(out, "{value}");
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
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    if n.is_f64()
        && let Some(f) = n.as_f64()
        && f.fract() == 0.0
        && f.abs() < MAX_EXACT_F64_INT
    {
        let _ = write!(out, "{}", f as i64);
        return;
    }
    let _ = write!(out, "{n}");
}

/// A cached tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCacheEntry {
    pub output: Value,
    pub timestamp: DateTime<Utc>,
    /// Whether the tool itself reported the output as served from a cache.
    pub cached: bool,
}
