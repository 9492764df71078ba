// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query planning and optimization
//!
//! A parsed query is turned into an execution plan by [`build_plan`], a
//! chain of typed nodes from a Singleton up to a Return. The [`Optimizer`]
//! runs the rule registry over that plan, keeping cost estimates current
//! after every rewrite, and [`select_plan`] picks the cheapest candidate.
//! [`ExplainOutput`] reports the result.

pub mod builder;
pub mod cost;
pub mod distribution;
pub mod error;
pub mod execution_plan;
pub mod explain;
pub mod expression;
pub mod index_selection;
pub mod node;
pub mod optimizer;
pub mod rules;
pub mod selector;
pub mod trace;

pub use builder::build_plan;
pub use cost::{CostEstimate, CostModel};
pub use error::{ErrorKind, PlanError, PlanResult};
pub use execution_plan::Plan;
pub use explain::{ExplainNode, ExplainOutput, ExplainPlan};
pub use expression::{Expr, VarId, VariableTable};
pub use node::{NodeId, NodeKind, PlanNode, SortElement, SortMode};
pub use optimizer::{CancellationToken, OptimizationResult, Optimizer, OptimizerStats};
pub use rules::{registry, rule_by_name, Rule, RuleSelection};
pub use selector::select_plan;
pub use trace::{format_plan, OptimizerTrace};
