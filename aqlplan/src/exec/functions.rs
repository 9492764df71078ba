// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Built-in functions and COLLECT aggregates

use crate::exec::error::{ExecutionError, ExecutionResult};
use crate::exec::value::{compare_values, number, to_number, to_text};
use crate::plan::node::AggregateFunction;
use serde_json::Value;
use std::cmp::Ordering;

/// Names accepted in function calls, upper case
pub const FUNCTION_NAMES: &[&str] = &[
    "LENGTH", "COUNT", "CONCAT", "LOWER", "UPPER", "ABS", "FLOOR", "SUM", "MIN", "MAX", "AVERAGE",
    "AVG", "FULLTEXT", "RAND",
];

pub fn is_known_function(name: &str) -> bool {
    FUNCTION_NAMES.contains(&name)
}

fn arity(name: &str, arguments: &[Value], min: usize, max: usize) -> ExecutionResult<()> {
    if arguments.len() < min || arguments.len() > max {
        return Err(ExecutionError::ExpressionError(format!(
            "{}() expects {} to {} arguments, got {}",
            name,
            min,
            max,
            arguments.len()
        )));
    }
    Ok(())
}

fn argument(arguments: &[Value], position: usize) -> &Value {
    arguments.get(position).unwrap_or(&Value::Null)
}

/// Call a function that only depends on its argument values
pub fn call_function(name: &str, arguments: Vec<Value>) -> ExecutionResult<Value> {
    match name {
        "LENGTH" | "COUNT" => {
            arity(name, &arguments, 1, 1)?;
            Ok(Value::from(length(argument(&arguments, 0))))
        }
        "CONCAT" => Ok(Value::String(arguments.iter().map(to_text).collect())),
        "LOWER" => {
            arity(name, &arguments, 1, 1)?;
            Ok(Value::String(to_text(argument(&arguments, 0)).to_lowercase()))
        }
        "UPPER" => {
            arity(name, &arguments, 1, 1)?;
            Ok(Value::String(to_text(argument(&arguments, 0)).to_uppercase()))
        }
        "ABS" => {
            arity(name, &arguments, 1, 1)?;
            Ok(number(to_number(argument(&arguments, 0)).abs()))
        }
        "FLOOR" => {
            arity(name, &arguments, 1, 1)?;
            Ok(number(to_number(argument(&arguments, 0)).floor()))
        }
        "SUM" | "MIN" | "MAX" | "AVERAGE" | "AVG" => {
            arity(name, &arguments, 1, 1)?;
            let function = AggregateFunction::from_name(name)
                .ok_or_else(|| ExecutionError::UnknownFunction(name.to_string()))?;
            match argument(&arguments, 0) {
                Value::Array(items) => Ok(aggregate(function, items)),
                Value::Null => Ok(Value::Null),
                other => Err(ExecutionError::TypeError(format!(
                    "{}() expects an array, got {}",
                    name, other
                ))),
            }
        }
        "RAND" => {
            arity(name, &arguments, 0, 0)?;
            Ok(number(fastrand::f64()))
        }
        other => Err(ExecutionError::UnknownFunction(other.to_string())),
    }
}

fn length(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Bool(b) => usize::from(*b),
        Value::Number(n) => n.to_string().len(),
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(entries) => entries.len(),
    }
}

/// Aggregate a group's values; nulls are ignored except by LENGTH
pub fn aggregate(function: AggregateFunction, values: &[Value]) -> Value {
    let non_null = || values.iter().filter(|value| !value.is_null());
    match function {
        AggregateFunction::Length => Value::from(values.len()),
        AggregateFunction::Sum => {
            if non_null().any(|value| !value.is_number()) {
                return Value::Null;
            }
            number(non_null().map(to_number).sum())
        }
        AggregateFunction::Min => non_null()
            .min_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateFunction::Max => non_null()
            .max_by(|a, b| match compare_values(a, b) {
                // keep the first of equal maxima
                Ordering::Equal => Ordering::Greater,
                ordering => ordering,
            })
            .cloned()
            .unwrap_or(Value::Null),
        AggregateFunction::Average => {
            if non_null().any(|value| !value.is_number()) {
                return Value::Null;
            }
            let count = non_null().count();
            if count == 0 {
                return Value::Null;
            }
            number(non_null().map(to_number).sum::<f64>() / count as f64)
        }
    }
}
