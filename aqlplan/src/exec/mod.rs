// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Reference execution of plans
//!
//! AQL value semantics, the built-in functions, expression evaluation and a
//! row-materializing executor used to check that optimization preserves
//! query results.

pub mod error;
pub mod eval;
pub mod executor;
pub mod fulltext;
pub mod functions;
pub mod merge;
pub mod result;
pub mod value;

pub use error::{ExecutionError, ExecutionResult};
pub use eval::{Bindings, Evaluator, FulltextSource};
pub use executor::PlanExecutor;
pub use result::{Cursor, ExecutionStats, QueryResult};
