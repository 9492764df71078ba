// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query Coordinator - parse, plan, optimize, explain and execute
//!
//! The coordinator owns the catalog and the optimizer configuration and is
//! the single entry point used by the CLI and by embedders. It keeps no
//! per-query state, so one coordinator can serve queries from many threads.

use crate::ast::{parse_query, ParserError};
use crate::catalog::MemoryCatalog;
use crate::config::OptimizerConfig;
use crate::exec::{Cursor, ExecutionError, PlanExecutor, QueryResult};
use crate::plan::{
    build_plan, select_plan, CancellationToken, ExplainOutput, OptimizerStats, OptimizerTrace,
    Optimizer, Plan, PlanError,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Default number of rows per cursor batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Syntax error: {0}")]
    Parse(#[from] ParserError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl QueryError {
    /// Errors that indicate a bug in the optimizer or executor rather than a
    /// problem with the query
    pub fn is_internal(&self) -> bool {
        match self {
            QueryError::Parse(_) => false,
            QueryError::Plan(error) => error.is_internal(),
            QueryError::Execution(error) => matches!(error, ExecutionError::InvalidPlan(..)),
        }
    }
}

/// Per-query switches
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Rule switches such as `-all`, `+use-indexes`, `-move-filters-up`,
    /// applied after the configured defaults
    pub rules: Vec<String>,
    /// Report how many rows reached the last LIMIT
    pub full_count: bool,
    pub batch_size: usize,
    pub cancellation: Option<CancellationToken>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            full_count: false,
            batch_size: DEFAULT_BATCH_SIZE,
            cancellation: None,
        }
    }
}

impl QueryOptions {
    pub fn with_rules<S: AsRef<str>>(mut self, rules: &[S]) -> Self {
        self.rules = rules.iter().map(|rule| rule.as_ref().to_string()).collect();
        self
    }

    pub fn with_full_count(mut self) -> Self {
        self.full_count = true;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Outcome of planning one query
#[derive(Debug)]
pub struct QueryPlan {
    pub id: Uuid,
    /// The selected plan
    pub plan: Plan,
    /// Candidates that lost the selection
    pub alternatives: Vec<Plan>,
    pub stats: OptimizerStats,
    pub trace: OptimizerTrace,
    pub warnings: Vec<String>,
}

impl QueryPlan {
    pub fn explain(&self) -> ExplainOutput {
        ExplainOutput::new(&self.plan, self.stats, self.warnings.clone())
    }

    /// Explain output of every candidate, the selected plan first
    pub fn explain_all(&self) -> Vec<ExplainOutput> {
        std::iter::once(&self.plan)
            .chain(self.alternatives.iter())
            .map(|plan| ExplainOutput::new(plan, self.stats, self.warnings.clone()))
            .collect()
    }
}

pub struct QueryCoordinator {
    catalog: Arc<MemoryCatalog>,
    config: OptimizerConfig,
}

impl QueryCoordinator {
    pub fn new(catalog: Arc<MemoryCatalog>, config: OptimizerConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &Arc<MemoryCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Parse, build and optimize a query, then select the plan to run
    pub fn plan(&self, query_text: &str, options: &QueryOptions) -> Result<QueryPlan, QueryError> {
        let id = Uuid::new_v4();
        let start = Instant::now();
        let query = parse_query(query_text)?;
        let plan = build_plan(&query, self.catalog.as_ref(), options.full_count)?;

        let mut optimizer =
            Optimizer::new(self.catalog.as_ref(), &self.config).with_rules(&options.rules);
        if let Some(token) = &options.cancellation {
            optimizer = optimizer.with_cancellation(token.clone());
        }
        let result = optimizer.optimize(plan)?;
        for warning in &result.warnings {
            log::warn!("Query {}: {}", id, warning);
        }
        let (plan, alternatives) = select_plan(result.plans)?;

        log::debug!(
            "Query {} planned in {:.3}ms: {} rules executed, {} candidate plans",
            id,
            start.elapsed().as_secs_f64() * 1000.0,
            result.stats.rules_executed,
            alternatives.len() + 1
        );
        Ok(QueryPlan {
            id,
            plan,
            alternatives,
            stats: result.stats,
            trace: result.trace,
            warnings: result.warnings,
        })
    }

    pub fn explain(
        &self,
        query_text: &str,
        options: &QueryOptions,
    ) -> Result<ExplainOutput, QueryError> {
        Ok(self.plan(query_text, options)?.explain())
    }

    /// Plan and run a query, returning all rows at once
    pub fn query(&self, query_text: &str, options: &QueryOptions) -> Result<QueryResult, QueryError> {
        let planned = self.plan(query_text, options)?;
        let store = self.catalog.as_ref();
        let result = PlanExecutor::new(&planned.plan, store, store).execute()?;
        log::debug!("Query {} returned {} rows", planned.id, result.rows.len());
        Ok(result)
    }

    /// Plan and run a query, returning a cursor over the rows
    pub fn execute(&self, query_text: &str, options: &QueryOptions) -> Result<Cursor, QueryError> {
        let result = self.query(query_text, options)?;
        Ok(Cursor::new(result, options.batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CollectionDefinition;
    use serde_json::json;

    fn coordinator(config: OptimizerConfig) -> QueryCoordinator {
        let catalog = MemoryCatalog::new();
        catalog
            .create_collection(
                CollectionDefinition::new("docs")
                    .with_shards(2)
                    .with_documents((1..=5).map(|i| json!({ "n": i })).collect()),
            )
            .unwrap();
        QueryCoordinator::new(Arc::new(catalog), config)
    }

    #[test]
    fn test_execute_in_batches() {
        let coordinator = coordinator(OptimizerConfig::default());
        let options = QueryOptions::default().with_batch_size(2).with_full_count();
        let mut cursor = coordinator
            .execute("FOR d IN docs SORT d.n LIMIT 3 RETURN d.n", &options)
            .unwrap();
        assert_eq!(cursor.row_count(), 3);
        assert_eq!(cursor.full_count(), Some(5));
        assert_eq!(cursor.next_batch(), Some(vec![json!(1), json!(2)]));
        assert_eq!(cursor.next_batch(), Some(vec![json!(3)]));
        assert_eq!(cursor.next_batch(), None);
    }

    #[test]
    fn test_error_classification() {
        let coordinator = coordinator(OptimizerConfig::default());
        let options = QueryOptions::default();

        let error = coordinator.explain("FOR d IN", &options).unwrap_err();
        assert!(matches!(error, QueryError::Parse(_)));
        assert!(!error.is_internal());

        let error = coordinator
            .explain("FOR d IN missing RETURN d", &options)
            .unwrap_err();
        assert!(matches!(error, QueryError::Plan(_)));
        assert!(!error.is_internal());

        assert!(QueryError::Plan(PlanError::NoCandidatePlans).is_internal());
    }

    #[test]
    fn test_plan_reports_candidates() {
        let coordinator = coordinator(OptimizerConfig::cluster());
        let planned = coordinator
            .plan(
                "FOR a IN docs FOR b IN [1, 2] RETURN [a, b]",
                &QueryOptions::default(),
            )
            .unwrap();
        let all = planned.explain_all();
        assert_eq!(all.len(), planned.alternatives.len() + 1);
        assert!(all[0].plan.estimated_cost <= all.last().unwrap().plan.estimated_cost);
        assert!(planned.plan.applied_rules().contains(&"scatter-in-cluster"));
    }
}
