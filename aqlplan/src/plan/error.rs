// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for plan construction, estimation and optimization

use super::node::NodeId;
use serde::Serialize;
use thiserror::Error;

/// Error categories, stable across error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    DanglingDependency,
    InvalidSubplan,
    UnestimatedDependency,
    OptimizationFailed,
    UnknownShardTopology,
    NoCandidatePlans,
    UnknownCollection,
    UnknownVariable,
    InvalidQuery,
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Dangling dependency: node {0} is not part of the plan")]
    DanglingDependency(NodeId),

    #[error("Invalid subquery plan: {0}")]
    InvalidSubplan(String),

    #[error("Node {node} depends on node {dependency}, which has no estimate")]
    UnestimatedDependency { node: NodeId, dependency: NodeId },

    #[error("Optimization failed in rule '{rule}': {reason}")]
    OptimizationFailed { rule: String, reason: String },

    #[error("Unknown shard topology for collection '{0}'")]
    UnknownShardTopology(String),

    #[error("Optimizer produced no candidate plans")]
    NoCandidatePlans,

    #[error("Collection not found: {0}")]
    UnknownCollection(String),

    #[error("Variable '{0}' is not defined")]
    UnknownVariable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Query optimization was cancelled")]
    Cancelled,
}

impl PlanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::DanglingDependency(_) => ErrorKind::DanglingDependency,
            PlanError::InvalidSubplan(_) => ErrorKind::InvalidSubplan,
            PlanError::UnestimatedDependency { .. } => ErrorKind::UnestimatedDependency,
            PlanError::OptimizationFailed { .. } => ErrorKind::OptimizationFailed,
            PlanError::UnknownShardTopology(_) => ErrorKind::UnknownShardTopology,
            PlanError::NoCandidatePlans => ErrorKind::NoCandidatePlans,
            PlanError::UnknownCollection(_) => ErrorKind::UnknownCollection,
            PlanError::UnknownVariable(_) => ErrorKind::UnknownVariable,
            PlanError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            PlanError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Driver invariant violations; callers answer these with an internal
    /// error instead of a query compilation error
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DanglingDependency
                | ErrorKind::InvalidSubplan
                | ErrorKind::UnestimatedDependency
                | ErrorKind::NoCandidatePlans
        )
    }
}

pub type PlanResult<T> = Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(PlanError::NoCandidatePlans.is_internal());
        assert!(PlanError::UnestimatedDependency {
            node: NodeId(2),
            dependency: NodeId(1)
        }
        .is_internal());

        let failed = PlanError::OptimizationFailed {
            rule: "use-indexes".to_string(),
            reason: "boom".to_string(),
        };
        assert!(!failed.is_internal());
        assert_eq!(failed.kind(), ErrorKind::OptimizationFailed);
        assert!(failed.to_string().contains("use-indexes"));
        assert!(!PlanError::UnknownShardTopology("c".to_string()).is_internal());
    }
}
