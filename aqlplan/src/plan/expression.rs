// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Plan-level expressions and the variable table
//!
//! Expressions in a plan reference variables by [`VarId`] instead of by
//! name, so rules can move calculations around without name capture and the
//! data-flow checks reduce to set operations on ids.

use crate::ast::{BinaryOperator, UnaryOperator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Logical variable identifier, unique within one plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub usize);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Variable names by id. User variables keep their query name, temporaries
/// are named `#<id>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableTable {
    names: Vec<String>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: &str) -> VarId {
        self.names.push(name.to_string());
        VarId(self.names.len() - 1)
    }

    pub fn create_temporary(&mut self) -> VarId {
        let id = VarId(self.names.len());
        self.names.push(format!("#{}", id.0));
        id
    }

    pub fn name(&self, id: VarId) -> &str {
        self.names.get(id.0).map(String::as_str).unwrap_or("?")
    }

    pub fn is_temporary(&self, id: VarId) -> bool {
        self.name(id).starts_with('#')
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (VarId(i), name.as_str()))
    }
}

/// Functions whose result depends on something besides their arguments
const NON_DETERMINISTIC_FUNCTIONS: &[&str] = &["RAND"];

/// Functions that read collection data
const DATA_ACCESS_FUNCTIONS: &[&str] = &["FULLTEXT"];

/// Expression over plan variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Value(Value),
    Reference(VarId),
    /// Collection name used as a function argument
    Collection(String),
    Attribute {
        base: Box<Expr>,
        name: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Range {
        low: Box<Expr>,
        high: Box<Expr>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Function {
        name: String,
        arguments: Vec<Expr>,
    },
}

impl Expr {
    pub fn binary(operator: BinaryOperator, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn attribute(base: Expr, name: &str) -> Self {
        Expr::Attribute {
            base: Box::new(base),
            name: name.to_string(),
        }
    }

    /// `var.a.b.c` from a variable and an attribute path
    pub fn attribute_path_of(var: VarId, path: &[String]) -> Self {
        path.iter().fold(Expr::Reference(var), |base, name| {
            Expr::attribute(base, name)
        })
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Value(_) | Expr::Reference(_) | Expr::Collection(_) => Vec::new(),
            Expr::Attribute { base, .. } => vec![base],
            Expr::Index { base, index } => vec![base, index],
            Expr::Array(items) => items.iter().collect(),
            Expr::Object(entries) => entries.iter().map(|(_, value)| value).collect(),
            Expr::Range { low, high } => vec![low, high],
            Expr::Unary { operand, .. } => vec![operand],
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::Function { arguments, .. } => arguments.iter().collect(),
        }
    }

    /// Variables referenced anywhere in the expression
    pub fn variables_used(&self) -> BTreeSet<VarId> {
        let mut used = BTreeSet::new();
        self.collect_variables(&mut used);
        used
    }

    fn collect_variables(&self, used: &mut BTreeSet<VarId>) {
        if let Expr::Reference(var) = self {
            used.insert(*var);
        }
        for child in self.children() {
            child.collect_variables(used);
        }
    }

    pub fn uses_variable(&self, var: VarId) -> bool {
        match self {
            Expr::Reference(v) => *v == var,
            _ => self.children().iter().any(|child| child.uses_variable(var)),
        }
    }

    pub fn is_deterministic(&self) -> bool {
        if let Expr::Function { name, .. } = self {
            if NON_DETERMINISTIC_FUNCTIONS.contains(&name.as_str()) {
                return false;
            }
        }
        self.children().iter().all(|child| child.is_deterministic())
    }

    /// Whether evaluation can fail at runtime. Only function calls and
    /// ranges report errors.
    pub fn can_throw(&self) -> bool {
        match self {
            Expr::Function { .. } | Expr::Range { .. } => true,
            _ => self.children().iter().any(|child| child.can_throw()),
        }
    }

    /// Deterministic and independent of variables and collection data
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Reference(_) | Expr::Collection(_) => false,
            Expr::Function { name, .. }
                if NON_DETERMINISTIC_FUNCTIONS.contains(&name.as_str())
                    || DATA_ACCESS_FUNCTIONS.contains(&name.as_str()) =>
            {
                false
            }
            _ => self.children().iter().all(|child| child.is_constant()),
        }
    }

    /// Value of a constant expression, `None` if it is not constant or its
    /// evaluation fails
    pub fn evaluate_constant(&self) -> Option<Value> {
        if !self.is_constant() {
            return None;
        }
        crate::exec::eval::evaluate_constant(self).ok()
    }

    /// `(var, [a, b])` for an attribute access chain `var.a.b`
    pub fn attribute_path(&self) -> Option<(VarId, Vec<String>)> {
        match self {
            Expr::Reference(var) => Some((*var, Vec::new())),
            Expr::Attribute { base, name } => {
                let (var, mut path) = base.attribute_path()?;
                path.push(name.clone());
                Some((var, path))
            }
            _ => None,
        }
    }

    /// Replace every reference to `from` by a reference to `to`
    pub fn replace_variable(&mut self, from: VarId, to: VarId) {
        match self {
            Expr::Reference(var) if *var == from => *var = to,
            Expr::Value(_) | Expr::Reference(_) | Expr::Collection(_) => {}
            Expr::Attribute { base, .. } => base.replace_variable(from, to),
            Expr::Index { base, index } => {
                base.replace_variable(from, to);
                index.replace_variable(from, to);
            }
            Expr::Array(items) => items.iter_mut().for_each(|e| e.replace_variable(from, to)),
            Expr::Object(entries) => entries
                .iter_mut()
                .for_each(|(_, e)| e.replace_variable(from, to)),
            Expr::Range { low, high } => {
                low.replace_variable(from, to);
                high.replace_variable(from, to);
            }
            Expr::Unary { operand, .. } => operand.replace_variable(from, to),
            Expr::Binary { left, right, .. } => {
                left.replace_variable(from, to);
                right.replace_variable(from, to);
            }
            Expr::Function { arguments, .. } => arguments
                .iter_mut()
                .for_each(|e| e.replace_variable(from, to)),
        }
    }

    /// Replace every reference to `var` by a copy of `expression`
    pub fn substitute(&mut self, var: VarId, expression: &Expr) {
        if matches!(self, Expr::Reference(v) if *v == var) {
            *self = expression.clone();
            return;
        }
        match self {
            Expr::Value(_) | Expr::Reference(_) | Expr::Collection(_) => {}
            Expr::Attribute { base, .. } => base.substitute(var, expression),
            Expr::Index { base, index } => {
                base.substitute(var, expression);
                index.substitute(var, expression);
            }
            Expr::Array(items) => items.iter_mut().for_each(|e| e.substitute(var, expression)),
            Expr::Object(entries) => entries
                .iter_mut()
                .for_each(|(_, e)| e.substitute(var, expression)),
            Expr::Range { low, high } => {
                low.substitute(var, expression);
                high.substitute(var, expression);
            }
            Expr::Unary { operand, .. } => operand.substitute(var, expression),
            Expr::Binary { left, right, .. } => {
                left.substitute(var, expression);
                right.substitute(var, expression);
            }
            Expr::Function { arguments, .. } => arguments
                .iter_mut()
                .for_each(|e| e.substitute(var, expression)),
        }
    }

    /// Render as query text, resolving variable names
    pub fn render(&self, variables: &VariableTable) -> String {
        match self {
            Expr::Value(value) => value.to_string(),
            Expr::Reference(var) => variables.name(*var).to_string(),
            Expr::Collection(name) => name.clone(),
            Expr::Attribute { base, name } => format!("{}.{}", base.render(variables), name),
            Expr::Index { base, index } => {
                format!("{}[{}]", base.render(variables), index.render(variables))
            }
            Expr::Array(items) => format!(
                "[ {} ]",
                items
                    .iter()
                    .map(|item| item.render(variables))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Expr::Object(entries) => format!(
                "{{ {} }}",
                entries
                    .iter()
                    .map(|(key, value)| format!("\"{}\" : {}", key, value.render(variables)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Expr::Range { low, high } => {
                format!("{} .. {}", low.render(variables), high.render(variables))
            }
            Expr::Unary { operator, operand } => match operator {
                UnaryOperator::Not => format!("!{}", operand.render(variables)),
                UnaryOperator::Minus => format!("-{}", operand.render(variables)),
            },
            Expr::Binary {
                operator,
                left,
                right,
            } => format!(
                "({} {} {})",
                left.render(variables),
                operator.as_str(),
                right.render(variables)
            ),
            Expr::Function { name, arguments } => format!(
                "{}({})",
                name,
                arguments
                    .iter()
                    .map(|argument| argument.render(variables))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variables_and_paths() {
        let mut variables = VariableTable::new();
        let doc = variables.create("doc");
        let tmp = variables.create_temporary();
        assert_eq!(variables.name(tmp), "#1");
        assert!(variables.is_temporary(tmp));

        let path = Expr::attribute_path_of(doc, &["t3".to_string(), "e".to_string()]);
        assert_eq!(
            path.attribute_path(),
            Some((doc, vec!["t3".to_string(), "e".to_string()]))
        );
        assert_eq!(path.render(&variables), "doc.t3.e");

        let condition = Expr::binary(BinaryOperator::Equal, path, Expr::Reference(tmp));
        assert_eq!(
            condition.variables_used().into_iter().collect::<Vec<_>>(),
            vec![doc, tmp]
        );
        assert!(!condition.is_constant());
    }

    #[test]
    fn test_constant_folding() {
        let sum = Expr::binary(
            BinaryOperator::Plus,
            Expr::Value(json!(1)),
            Expr::Value(json!(2)),
        );
        assert!(sum.is_constant());
        assert_eq!(sum.evaluate_constant(), Some(json!(3)));

        let rand = Expr::Function {
            name: "RAND".to_string(),
            arguments: vec![],
        };
        assert!(!rand.is_deterministic());
        assert!(!rand.is_constant());
        assert_eq!(rand.evaluate_constant(), None);
    }

    #[test]
    fn test_replace_variable() {
        let mut expr = Expr::binary(
            BinaryOperator::Equal,
            Expr::attribute(Expr::Reference(VarId(1)), "a"),
            Expr::Reference(VarId(1)),
        );
        expr.replace_variable(VarId(1), VarId(4));
        assert!(!expr.uses_variable(VarId(1)));
        assert!(expr.uses_variable(VarId(4)));
    }

    #[test]
    fn test_substitute_and_can_throw() {
        let mut variables = VariableTable::new();
        let doc = variables.create("doc");
        let tmp = variables.create_temporary();
        let doubled = Expr::binary(
            BinaryOperator::Multiply,
            Expr::attribute(Expr::Reference(doc), "n"),
            Expr::Value(json!(2)),
        );
        let mut sum = Expr::binary(
            BinaryOperator::Plus,
            Expr::Reference(tmp),
            Expr::Reference(tmp),
        );
        sum.substitute(tmp, &doubled);
        assert!(!sum.uses_variable(tmp));
        assert_eq!(sum.render(&variables), "((doc.n * 2) + (doc.n * 2))");
        assert!(!sum.can_throw());

        let range = Expr::Range {
            low: Box::new(Expr::Value(json!(1))),
            high: Box::new(Expr::Reference(doc)),
        };
        assert!(range.can_throw());
        let call = Expr::Function {
            name: "LENGTH".to_string(),
            arguments: vec![Expr::Reference(doc)],
        };
        assert!(Expr::Array(vec![call]).can_throw());
    }
}
