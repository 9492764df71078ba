// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution error types

use crate::catalog::CatalogError;
use crate::plan::NodeId;
use thiserror::Error;

/// Execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Expression evaluation error: {0}")]
    ExpressionError(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Variable '{0}' has no value in this row")]
    UnboundVariable(String),

    #[error("Plan node {0} cannot be executed: {1}")]
    InvalidPlan(NodeId, String),

    #[error("Fulltext query error: {0}")]
    FulltextError(String),
}

impl From<CatalogError> for ExecutionError {
    fn from(error: CatalogError) -> Self {
        ExecutionError::StorageError(error.to_string())
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
