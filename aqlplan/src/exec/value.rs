// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! AQL value semantics over `serde_json::Value`
//!
//! Values of different types order as null < bool < number < string <
//! array < object. Arrays compare element-wise, objects compare attribute by
//! attribute in key order with missing attributes treated as null.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over AQL values
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::Number(l), Value::Number(r)) => compare_numbers(l, r),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Array(l), Value::Array(r)) => {
            for (a, b) in l.iter().zip(r.iter()) {
                let ordering = compare_values(a, b);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            l.len().cmp(&r.len())
        }
        (Value::Object(l), Value::Object(r)) => compare_objects(l, r),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

fn compare_numbers(left: &Number, right: &Number) -> Ordering {
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        return l.cmp(&r);
    }
    let l = left.as_f64().unwrap_or(0.0);
    let r = right.as_f64().unwrap_or(0.0);
    l.total_cmp(&r)
}

fn compare_objects(left: &Map<String, Value>, right: &Map<String, Value>) -> Ordering {
    let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    for key in keys {
        let ordering = compare_values(
            left.get(key).unwrap_or(&Value::Null),
            right.get(key).unwrap_or(&Value::Null),
        );
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub fn values_equal(left: &Value, right: &Value) -> bool {
    compare_values(left, right) == Ordering::Equal
}

/// Truthiness used by FILTER and the logical operators
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric interpretation used by arithmetic
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Array(items) if items.is_empty() => 0.0,
        Value::Array(items) if items.len() == 1 => to_number(&items[0]),
        Value::Array(_) | Value::Object(_) => 0.0,
    }
}

/// JSON number for an arithmetic result: integral values become integers,
/// non-finite values become null
pub fn number(value: f64) -> Value {
    if !value.is_finite() {
        return Value::Null;
    }
    if value.fract() == 0.0 && value.abs() < 9.007_199_254_740_992e15 {
        return Value::from(value as i64);
    }
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// String form used by CONCAT and string functions
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Value at an attribute path, null when any step is missing
pub fn get_path(value: &Value, path: &[String]) -> Value {
    path.iter()
        .try_fold(value, |current, key| current.get(key.as_str()))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Value at a dot separated attribute path
pub fn get_field(value: &Value, field: &str) -> Value {
    field
        .split('.')
        .try_fold(value, |current, key| current.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_order() {
        let ordered = vec![
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(2.5),
            json!(3),
            json!(""),
            json!("a"),
            json!([]),
            json!([1]),
            json!({}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare_values(&pair[0], &pair[1]), Ordering::Less, "{:?}", pair);
        }
        assert!(values_equal(&json!(3), &json!(3.0)));
        assert!(values_equal(&json!({"a": null}), &json!({})));
    }

    #[test]
    fn test_numbers_and_truthiness() {
        assert_eq!(number(3.0), json!(3));
        assert_eq!(number(2.5), json!(2.5));
        assert_eq!(number(f64::NAN), json!(null));
        assert_eq!(to_number(&json!("12")), 12.0);
        assert_eq!(to_number(&json!([4])), 4.0);
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!([])));
        assert!(!is_truthy(&json!("")));
    }

    #[test]
    fn test_paths() {
        let doc = json!({ "t3": { "e": { "x": "müller" } } });
        assert_eq!(get_field(&doc, "t3.e.x"), json!("müller"));
        assert_eq!(get_path(&doc, &["t3".to_string(), "y".to_string()]), json!(null));
    }
}
