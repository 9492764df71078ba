// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! aqlplan - a rule-based, cluster-aware query optimizer for AQL
//!
//! aqlplan turns AQL queries into execution plans and rewrites them with a
//! fixed registry of optimizer rules: filter and calculation movement,
//! redundant sort removal, index selection (including fulltext indexes),
//! loop reordering and, for sharded deployments, scatter/gather
//! distribution. Every candidate plan is costed and the cheapest one wins.
//!
//! # Features
//!
//! - **Cost model**: per-node item and cost estimates driven by index
//!   selectivity and collection sizes
//! - **Rule registry**: ordered passes that can be switched on and off per
//!   query with `-all`, `+rule`, `-rule`
//! - **Cluster planning**: Scatter, Distribute, Remote and Gather nodes with
//!   sorted merges chosen by shard count
//! - **Explain**: JSON and text plan output
//! - **Reference executor**: runs plans against an in-memory sharded store
//!
//! # Usage
//!
//! ```no_run
//! use aqlplan::{MemoryCatalog, OptimizerConfig, QueryCoordinator, QueryOptions};
//! use std::sync::Arc;
//!
//! let catalog = MemoryCatalog::from_file("catalog.json").unwrap();
//! let coordinator = QueryCoordinator::new(Arc::new(catalog), OptimizerConfig::cluster());
//! let explain = coordinator
//!     .explain("FOR d IN docs FILTER d.n > 3 RETURN d", &QueryOptions::default())
//!     .unwrap();
//! println!("{}", serde_json::to_string_pretty(&explain).unwrap());
//! ```

pub mod ast;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod exec;
pub mod plan;

pub use catalog::{Catalog, CollectionDefinition, DocumentStore, IndexDefinition, MemoryCatalog};
pub use config::OptimizerConfig;
pub use coordinator::{Cursor, QueryCoordinator, QueryError, QueryOptions, QueryPlan, QueryResult};
pub use plan::{CancellationToken, ExplainOutput, Plan, PlanError};

/// aqlplan version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// aqlplan crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
