// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Abstract Syntax Tree (AST) structures for the AQL query subset

use serde::{Deserialize, Serialize};

/// A complete query: a pipeline of operations terminated by RETURN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub operations: Vec<Operation>,
    pub return_clause: ReturnClause,
}

/// Single pipeline operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// FOR var IN source
    For { variable: String, source: Expression },

    /// FOR v[, e[, p]] IN min..max DIRECTION start edgeCollection
    Traversal(TraversalClause),

    /// FILTER condition
    Filter(Expression),

    /// LET variable = value
    Let { variable: String, value: Expression },

    /// SORT expr [ASC|DESC], ...
    Sort(Vec<SortItem>),

    /// LIMIT [offset,] count
    Limit { offset: u64, count: u64 },

    /// COLLECT ... [AGGREGATE ...] [INTO ...] [WITH COUNT INTO ...]
    Collect(CollectClause),
}

/// Graph traversal clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalClause {
    pub vertex_variable: String,
    pub edge_variable: Option<String>,
    pub path_variable: Option<String>,
    pub min_depth: u64,
    pub max_depth: u64,
    pub direction: EdgeDirection,
    pub start: Expression,
    pub edge_collection: String,
}

/// Direction of a traversal step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeDirection {
    Outbound,
    Inbound,
    Any,
}

/// Single SORT criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortItem {
    pub expression: Expression,
    pub ascending: bool,
}

/// COLLECT clause
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectClause {
    pub groups: Vec<(String, Expression)>,
    pub aggregates: Vec<AggregateAssignment>,
    pub into: Option<String>,
    pub count_into: Option<String>,
}

/// AGGREGATE name = FUNC(expr)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateAssignment {
    pub variable: String,
    pub function: String,
    pub argument: Expression,
}

/// RETURN [DISTINCT] expr
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnClause {
    pub distinct: bool,
    pub expression: Expression,
}

/// Expression tree as written in the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Literal(Literal),
    /// Bare identifier: a variable, or a collection name in FOR sources
    Identifier(String),
    AttributeAccess {
        base: Box<Expression>,
        attribute: String,
    },
    IndexAccess {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    Array(Vec<Expression>),
    Object(Vec<(String, Expression)>),
    Range {
        low: Box<Expression>,
        high: Box<Expression>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    FunctionCall {
        name: String,
        arguments: Vec<Expression>,
    },
    Subquery(Box<Query>),
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    And,
    Or,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    In,
    NotIn,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl Expression {
    pub fn identifier(name: impl Into<String>) -> Self {
        Expression::Identifier(name.into())
    }

    pub fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

impl BinaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::In => "IN",
            BinaryOperator::NotIn => "NOT IN",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
        }
    }

    /// Operator with swapped operands (`a < b` is `b > a`)
    pub fn reversed(&self) -> Option<BinaryOperator> {
        match self {
            BinaryOperator::Equal => Some(BinaryOperator::Equal),
            BinaryOperator::NotEqual => Some(BinaryOperator::NotEqual),
            BinaryOperator::LessThan => Some(BinaryOperator::GreaterThan),
            BinaryOperator::LessEqual => Some(BinaryOperator::GreaterEqual),
            BinaryOperator::GreaterThan => Some(BinaryOperator::LessThan),
            BinaryOperator::GreaterEqual => Some(BinaryOperator::LessEqual),
            _ => None,
        }
    }
}
