// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query Coordinator - the public entry point for planning and running
//! queries

pub mod query_coordinator;

pub use query_coordinator::{
    QueryCoordinator, QueryError, QueryOptions, QueryPlan, DEFAULT_BATCH_SIZE,
};

// Re-export types needed for the public API
pub use crate::exec::{Cursor, QueryResult};
