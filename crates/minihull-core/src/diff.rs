//! # Diff Engine
//!
//! Field-level change sets between two states of a record.
//!
//! ## Loose Equality
//!
//! Values are compared with [`loose_equals`], which coerces between strings,
//! numbers and booleans (so `"1"` and `1` are equal). This looseness is
//! deliberate and stable: existing connector tests assert on change sets
//! produced this way.
//!
//! Coercion rules:
//! - `null` equals only `null`
//! - a boolean is compared as `0` or `1`
//! - a string compared with a number is parsed as a number (blank is `0`)
//! - two arrays or objects are equal when structurally equal
//! - an array compared with a scalar is first joined into a string
//!   (`[1, 2]` reads as `"1,2"`, `null` items as `""`), so `[1]` equals `"1"`
//!   and `1`
//! - an object compared with a scalar reads as `"[object Object]"`

use crate::types::Record;
use serde_json::{Map, Value};

/// A change set: field name to `[old, new]`.
pub type Changes = Map<String, Value>;

/// Numeric reading of a scalar, if it has one.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// String form of an array or object, used when it meets a scalar.
fn composite_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(composite_text)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
        other => other.to_string(),
    }
}

/// Loose equality between two JSON values.
#[must_use]
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => a == b,
        (Value::Array(_) | Value::Object(_), _) => {
            loose_equals(&Value::String(composite_text(a)), b)
        }
        (_, Value::Array(_) | Value::Object(_)) => {
            loose_equals(a, &Value::String(composite_text(b)))
        }
        (Value::String(x), Value::String(y)) => x == y,
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Compute the changes that applying `next` to `previous` would make.
///
/// Only fields present in `next` are considered. An unchanged field is
/// omitted; a field absent from `previous` reports `null` as its old value.
#[must_use]
pub fn diff(previous: &Record, next: &Record) -> Changes {
    let mut changes = Changes::new();
    for (key, new_value) in next {
        let old_value = previous.get(key).unwrap_or(&Value::Null);
        if previous.contains_key(key) && loose_equals(old_value, new_value) {
            continue;
        }
        if !previous.contains_key(key) && new_value.is_null() {
            continue;
        }
        changes.insert(
            key.clone(),
            Value::Array(vec![old_value.clone(), new_value.clone()]),
        );
    }
    changes
}
