// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Expression evaluation against a row of variable bindings

use crate::ast::{BinaryOperator, UnaryOperator};
use crate::exec::error::{ExecutionError, ExecutionResult};
use crate::exec::functions::call_function;
use crate::exec::value::{compare_values, is_truthy, number, to_number, values_equal};
use crate::plan::expression::{Expr, VarId, VariableTable};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Values of the variables visible in one row
pub type Bindings = BTreeMap<VarId, Value>;

/// Largest range materialized by `a..b`
const MAX_RANGE_LENGTH: u64 = 10_000_000;

/// Document access for `FULLTEXT()` calls that were not turned into an
/// index lookup
pub trait FulltextSource {
    fn fulltext(
        &self,
        collection: &str,
        attribute: &str,
        query: &str,
        limit: Option<usize>,
    ) -> ExecutionResult<Vec<Value>>;
}

pub struct Evaluator<'a> {
    variables: Option<&'a VariableTable>,
    fulltext: Option<&'a dyn FulltextSource>,
}

impl<'a> Evaluator<'a> {
    pub fn new(variables: &'a VariableTable) -> Self {
        Self {
            variables: Some(variables),
            fulltext: None,
        }
    }

    /// Evaluator for variable-free expressions
    pub fn constant() -> Self {
        Self {
            variables: None,
            fulltext: None,
        }
    }

    pub fn with_fulltext(mut self, source: &'a dyn FulltextSource) -> Self {
        self.fulltext = Some(source);
        self
    }

    fn variable_name(&self, var: VarId) -> String {
        match self.variables {
            Some(variables) => variables.name(var).to_string(),
            None => var.to_string(),
        }
    }

    pub fn evaluate(&self, expr: &Expr, bindings: &Bindings) -> ExecutionResult<Value> {
        match expr {
            Expr::Value(value) => Ok(value.clone()),
            Expr::Reference(var) => bindings
                .get(var)
                .cloned()
                .ok_or_else(|| ExecutionError::UnboundVariable(self.variable_name(*var))),
            Expr::Collection(name) => Ok(Value::String(name.clone())),
            Expr::Attribute { base, name } => Ok(match self.evaluate(base, bindings)? {
                Value::Object(mut entries) => entries.remove(name).unwrap_or(Value::Null),
                _ => Value::Null,
            }),
            Expr::Index { base, index } => {
                let base = self.evaluate(base, bindings)?;
                let index = self.evaluate(index, bindings)?;
                Ok(index_value(base, &index))
            }
            Expr::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.evaluate(item, bindings))
                    .collect::<ExecutionResult<Vec<_>>>()?,
            )),
            Expr::Object(entries) => {
                let mut object = Map::new();
                for (key, value) in entries {
                    object.insert(key.clone(), self.evaluate(value, bindings)?);
                }
                Ok(Value::Object(object))
            }
            Expr::Range { low, high } => {
                let low = to_number(&self.evaluate(low, bindings)?) as i64;
                let high = to_number(&self.evaluate(high, bindings)?) as i64;
                range(low, high)
            }
            Expr::Unary { operator, operand } => {
                let value = self.evaluate(operand, bindings)?;
                Ok(match operator {
                    UnaryOperator::Not => Value::Bool(!is_truthy(&value)),
                    UnaryOperator::Minus => number(-to_number(&value)),
                })
            }
            Expr::Binary {
                operator,
                left,
                right,
            } => self.evaluate_binary(*operator, left, right, bindings),
            Expr::Function { name, arguments } if name == "FULLTEXT" => {
                self.evaluate_fulltext(arguments, bindings)
            }
            Expr::Function { name, arguments } => {
                let values = arguments
                    .iter()
                    .map(|argument| self.evaluate(argument, bindings))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                call_function(name, values)
            }
        }
    }

    fn evaluate_binary(
        &self,
        operator: BinaryOperator,
        left: &Expr,
        right: &Expr,
        bindings: &Bindings,
    ) -> ExecutionResult<Value> {
        // logical operators short-circuit and yield an operand
        match operator {
            BinaryOperator::And => {
                let left = self.evaluate(left, bindings)?;
                return if is_truthy(&left) {
                    self.evaluate(right, bindings)
                } else {
                    Ok(left)
                };
            }
            BinaryOperator::Or => {
                let left = self.evaluate(left, bindings)?;
                return if is_truthy(&left) {
                    Ok(left)
                } else {
                    self.evaluate(right, bindings)
                };
            }
            _ => {}
        }

        let l = self.evaluate(left, bindings)?;
        let r = self.evaluate(right, bindings)?;
        let ordering = || compare_values(&l, &r);
        Ok(match operator {
            BinaryOperator::Equal => Value::Bool(ordering() == Ordering::Equal),
            BinaryOperator::NotEqual => Value::Bool(ordering() != Ordering::Equal),
            BinaryOperator::LessThan => Value::Bool(ordering() == Ordering::Less),
            BinaryOperator::LessEqual => Value::Bool(ordering() != Ordering::Greater),
            BinaryOperator::GreaterThan => Value::Bool(ordering() == Ordering::Greater),
            BinaryOperator::GreaterEqual => Value::Bool(ordering() != Ordering::Less),
            BinaryOperator::In => Value::Bool(contains(&r, &l)),
            BinaryOperator::NotIn => Value::Bool(!contains(&r, &l)),
            BinaryOperator::Plus => number(to_number(&l) + to_number(&r)),
            BinaryOperator::Minus => number(to_number(&l) - to_number(&r)),
            BinaryOperator::Multiply => number(to_number(&l) * to_number(&r)),
            BinaryOperator::Divide => {
                let divisor = to_number(&r);
                if divisor == 0.0 {
                    Value::Null
                } else {
                    number(to_number(&l) / divisor)
                }
            }
            BinaryOperator::Modulo => {
                let divisor = to_number(&r);
                if divisor == 0.0 {
                    Value::Null
                } else {
                    number(to_number(&l) % divisor)
                }
            }
            BinaryOperator::And | BinaryOperator::Or => Value::Null,
        })
    }

    fn evaluate_fulltext(&self, arguments: &[Expr], bindings: &Bindings) -> ExecutionResult<Value> {
        if !(3..=4).contains(&arguments.len()) {
            return Err(ExecutionError::ExpressionError(format!(
                "FULLTEXT() expects 3 or 4 arguments, got {}",
                arguments.len()
            )));
        }
        let source = self.fulltext.ok_or_else(|| {
            ExecutionError::ExpressionError("FULLTEXT() requires collection access".to_string())
        })?;
        let collection = self.evaluate(&arguments[0], bindings)?;
        let attribute = self.evaluate(&arguments[1], bindings)?;
        let query = self.evaluate(&arguments[2], bindings)?;
        let limit = match arguments.get(3) {
            Some(limit) => self
                .evaluate(limit, bindings)?
                .as_u64()
                .map(|limit| limit as usize),
            None => None,
        };
        match (collection, attribute, query) {
            (Value::String(collection), Value::String(attribute), Value::String(query)) => Ok(
                Value::Array(source.fulltext(&collection, &attribute, &query, limit)?),
            ),
            _ => Err(ExecutionError::TypeError(
                "FULLTEXT() expects a collection, an attribute name and a query string"
                    .to_string(),
            )),
        }
    }
}

fn index_value(base: Value, index: &Value) -> Value {
    match (base, index) {
        (Value::Array(mut items), Value::Number(n)) => {
            let Some(position) = n.as_f64().map(|f| f as i64) else {
                return Value::Null;
            };
            let len = items.len() as i64;
            let position = if position < 0 { len + position } else { position };
            if (0..len).contains(&position) {
                items.swap_remove(position as usize)
            } else {
                Value::Null
            }
        }
        (Value::Object(mut entries), Value::String(key)) => {
            entries.remove(key).unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}

fn range(low: i64, high: i64) -> ExecutionResult<Value> {
    if high.abs_diff(low) >= MAX_RANGE_LENGTH {
        return Err(ExecutionError::ExpressionError(format!(
            "range {}..{} is too large",
            low, high
        )));
    }
    let values: Vec<Value> = if low <= high {
        (low..=high).map(Value::from).collect()
    } else {
        (high..=low).rev().map(Value::from).collect()
    };
    Ok(Value::Array(values))
}

/// Value of an expression that references no variables and no data
pub fn evaluate_constant(expr: &Expr) -> ExecutionResult<Value> {
    Evaluator::constant().evaluate(expr, &Bindings::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(v: Value) -> Expr {
        Expr::Value(v)
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let sum = Expr::binary(BinaryOperator::Plus, value(json!(1)), value(json!(2)));
        assert_eq!(evaluate_constant(&sum).unwrap(), json!(3));
        let div = Expr::binary(BinaryOperator::Divide, value(json!(1)), value(json!(0)));
        assert_eq!(evaluate_constant(&div).unwrap(), json!(null));
        let lt = Expr::binary(BinaryOperator::LessThan, value(json!(null)), value(json!(0)));
        assert_eq!(evaluate_constant(&lt).unwrap(), json!(true));
        let within = Expr::binary(BinaryOperator::In, value(json!(2)), value(json!([1, 2.0])));
        assert_eq!(evaluate_constant(&within).unwrap(), json!(true));
    }

    #[test]
    fn test_bindings_and_access() {
        let mut variables = VariableTable::new();
        let doc = variables.create("doc");
        let missing = variables.create("missing");
        let mut bindings = Bindings::new();
        bindings.insert(doc, json!({ "a": { "b": [10, 20, 30] } }));

        let evaluator = Evaluator::new(&variables);
        let last = Expr::Index {
            base: Box::new(Expr::attribute(Expr::attribute(Expr::Reference(doc), "a"), "b")),
            index: Box::new(value(json!(-1))),
        };
        assert_eq!(evaluator.evaluate(&last, &bindings).unwrap(), json!(30));
        assert_eq!(
            evaluator.evaluate(&Expr::Reference(missing), &bindings),
            Err(ExecutionError::UnboundVariable("missing".to_string()))
        );
    }

    #[test]
    fn test_ranges_and_logic() {
        let down = Expr::Range {
            low: Box::new(value(json!(3))),
            high: Box::new(value(json!(1))),
        };
        assert_eq!(evaluate_constant(&down).unwrap(), json!([3, 2, 1]));
        let or = Expr::binary(BinaryOperator::Or, value(json!(0)), value(json!("x")));
        assert_eq!(evaluate_constant(&or).unwrap(), json!("x"));
        let fulltext = Expr::Function {
            name: "FULLTEXT".to_string(),
            arguments: vec![
                Expr::Collection("docs".to_string()),
                value(json!("t")),
                value(json!("x")),
            ],
        };
        assert!(evaluate_constant(&fulltext).is_err());
    }
}
