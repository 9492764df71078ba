// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rule-driven plan optimizer
//!
//! The optimizer keeps a stack of `(plan, next rule)` pairs. Each step
//! applies the next enabled rule to the plan on top: a rule whose matcher
//! declines is skipped, an in-place rewrite is re-estimated and continues
//! with the following rule, and alternatives are pushed back as siblings
//! that each continue independently. A plan that has seen every rule is a
//! finished candidate for the plan selector.
//!
//! Estimates are refreshed after every rewrite, so cost-gated rules always
//! see current numbers. Cancellation is checked between rule applications.

use crate::catalog::Catalog;
use crate::config::OptimizerConfig;
use crate::plan::error::{PlanError, PlanResult};
use crate::plan::execution_plan::Plan;
use crate::plan::rules::{registry, Rewrite, Rule, RuleContext, RuleSelection};
use crate::plan::trace::{OptimizerTrace, PlanTracer};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a query and its optimizer
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerStats {
    pub rules_executed: usize,
    pub rules_skipped: usize,
    pub plans_created: usize,
}

#[derive(Debug)]
pub struct OptimizationResult {
    /// Finished candidate plans, all estimated
    pub plans: Vec<Plan>,
    pub stats: OptimizerStats,
    pub trace: OptimizerTrace,
    pub warnings: Vec<String>,
}

pub struct Optimizer<'a> {
    catalog: &'a dyn Catalog,
    config: &'a OptimizerConfig,
    selection: RuleSelection,
    cancellation: Option<CancellationToken>,
}

impl<'a> Optimizer<'a> {
    /// Optimizer with the configuration's default rule selection
    pub fn new(catalog: &'a dyn Catalog, config: &'a OptimizerConfig) -> Self {
        Self {
            catalog,
            config,
            selection: RuleSelection::new(&config.default_rules),
            cancellation: None,
        }
    }

    /// Apply per-query rule switches on top of the defaults
    pub fn with_rules<S: AsRef<str>>(mut self, switches: &[S]) -> Self {
        self.selection.apply(switches);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn active_rules(&self) -> Vec<&'static Rule> {
        registry()
            .iter()
            .filter(|rule| !rule.cluster_only || self.config.cluster)
            .filter(|rule| self.selection.is_enabled(rule))
            .collect()
    }

    fn check_cancelled(&self) -> PlanResult<()> {
        match &self.cancellation {
            Some(token) if token.is_cancelled() => Err(PlanError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Record a rewrite on the plan and bring its estimates up to date
    fn finish_rewrite(&self, plan: &mut Plan, rule: &Rule) -> PlanResult<()> {
        plan.add_applied_rule(rule.name);
        plan.prune_unreachable();
        plan.estimate_costs(&self.config.cost_model, self.catalog)
            .map_err(|error| rule_failure(rule, error))
    }

    pub fn optimize(&self, mut plan: Plan) -> PlanResult<OptimizationResult> {
        plan.estimate_costs(&self.config.cost_model, self.catalog)?;

        let rules = self.active_rules();
        let ctx = RuleContext {
            catalog: self.catalog,
            config: self.config,
        };
        let max_plans = self.config.max_number_of_plans.max(1);
        let mut stats = OptimizerStats {
            plans_created: 1,
            ..OptimizerStats::default()
        };
        let mut tracer = PlanTracer::new();
        let mut finished = Vec::new();
        let mut stack = vec![(plan, 0usize)];

        while let Some((plan, position)) = stack.pop() {
            let Some(rule) = rules.get(position).copied() else {
                finished.push(plan);
                continue;
            };
            self.check_cancelled()?;

            if !(rule.matcher)(&plan, &ctx) {
                stats.rules_skipped += 1;
                stack.push((plan, position + 1));
                continue;
            }

            stats.rules_executed += 1;
            let cost_before = plan.total_cost();
            tracer.start_step();
            let rewrite = (rule.rewriter)(plan, &ctx).map_err(|error| rule_failure(rule, error))?;

            match rewrite {
                Rewrite::Unchanged(plan) => {
                    tracer.end_step(rule.name, rule.pass, false, 0, cost_before, cost_before);
                    stack.push((plan, position + 1));
                }
                Rewrite::Modified(mut plan) => {
                    self.finish_rewrite(&mut plan, rule)?;
                    log::debug!(
                        "Rule {} rewrote plan, cost {} -> {}",
                        rule.name,
                        cost_before,
                        plan.total_cost()
                    );
                    tracer.end_step(
                        rule.name,
                        rule.pass,
                        true,
                        0,
                        cost_before,
                        plan.total_cost(),
                    );
                    stack.push((plan, position + 1));
                }
                Rewrite::Alternatives(alternatives) => {
                    let room = max_plans
                        .saturating_sub(stack.len() + finished.len())
                        .max(1);
                    let mut siblings = Vec::with_capacity(room);
                    for (mut alternative, modified) in alternatives.into_iter().take(room) {
                        if modified {
                            self.finish_rewrite(&mut alternative, rule)?;
                        }
                        siblings.push((alternative, position + 1));
                    }
                    stats.plans_created += siblings.len().saturating_sub(1);
                    log::debug!(
                        "Rule {} produced {} alternative plans",
                        rule.name,
                        siblings.len()
                    );
                    tracer.end_step(
                        rule.name,
                        rule.pass,
                        false,
                        siblings.len(),
                        cost_before,
                        cost_before,
                    );
                    // first alternative is processed first
                    stack.extend(siblings.into_iter().rev());
                }
            }
        }

        Ok(OptimizationResult {
            plans: finished,
            stats,
            trace: tracer.finalize(),
            warnings: self.selection.warnings().to_vec(),
        })
    }
}

/// Errors escaping a rule: topology and cancellation errors and driver bugs
/// pass through, everything else names the failing rule
fn rule_failure(rule: &Rule, error: PlanError) -> PlanError {
    match error {
        PlanError::UnknownShardTopology(_) | PlanError::Cancelled => error,
        error if error.is_internal() => error,
        error => PlanError::OptimizationFailed {
            rule: rule.name.to_string(),
            reason: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_query;
    use crate::catalog::{
        CollectionDefinition, IndexDescriptor, MemoryCatalog, ShardMap,
    };
    use crate::plan::builder::build_plan;
    use crate::plan::rules::rule_by_name;

    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        for name in ["a", "b"] {
            catalog
                .create_collection(CollectionDefinition::new(name).with_shards(3))
                .unwrap();
        }
        catalog
    }

    fn plan(query: &str, catalog: &dyn Catalog) -> Plan {
        build_plan(&parse_query(query).unwrap(), catalog, false).unwrap()
    }

    #[test]
    fn test_candidates_are_estimated() {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let result = Optimizer::new(&catalog, &config)
            .optimize(plan("FOR x IN a FILTER x.v == 1 RETURN x", &catalog))
            .unwrap();
        assert_eq!(result.plans.len(), 1);
        assert!(result.plans[0].total_cost().is_finite());
        assert!(result.stats.rules_executed > 0);
        assert_eq!(
            result.stats.rules_executed + result.stats.rules_skipped,
            registry().iter().filter(|rule| !rule.cluster_only).count()
        );
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_alternatives_become_candidates() {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let result = Optimizer::new(&catalog, &config)
            .optimize(plan("FOR x IN a FOR y IN b RETURN [x, y]", &catalog))
            .unwrap();
        assert_eq!(result.plans.len(), 2);
        assert_eq!(result.stats.plans_created, 2);
        assert!(result.plans[1]
            .applied_rules()
            .contains(&"interchange-adjacent-enumerations"));
        assert!(!result.plans[0]
            .applied_rules()
            .contains(&"interchange-adjacent-enumerations"));

        let capped = OptimizerConfig {
            max_number_of_plans: 1,
            ..OptimizerConfig::default()
        };
        let result = Optimizer::new(&catalog, &capped)
            .optimize(plan("FOR x IN a FOR y IN b RETURN [x, y]", &catalog))
            .unwrap();
        assert_eq!(result.plans.len(), 1);
    }

    #[test]
    fn test_disabled_rules_do_not_run() {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let result = Optimizer::new(&catalog, &config)
            .with_rules(&["-all", "unknown-rule"])
            .optimize(plan("FOR x IN a FOR y IN b RETURN [x, y]", &catalog))
            .unwrap();
        assert_eq!(result.plans.len(), 1);
        assert_eq!(result.stats.rules_executed, 0);
        assert!(result.plans[0].applied_rules().is_empty());
        assert_eq!(result.warnings.len(), 1);

        // required cluster rules survive -all
        let cluster = OptimizerConfig::cluster();
        let result = Optimizer::new(&catalog, &cluster)
            .with_rules(&["-all"])
            .optimize(plan("FOR x IN a RETURN x", &catalog))
            .unwrap();
        assert_eq!(result.plans[0].applied_rules(), &["scatter-in-cluster"]);
    }

    #[test]
    fn test_cancellation() {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let token = CancellationToken::new();
        token.cancel();
        let error = Optimizer::new(&catalog, &config)
            .with_cancellation(token)
            .optimize(plan("FOR x IN a RETURN x", &catalog))
            .unwrap_err();
        assert_eq!(error, PlanError::Cancelled);
    }

    /// Catalog that knows collections but not their shard layout
    struct NoTopology(MemoryCatalog);

    impl Catalog for NoTopology {
        fn has_collection(&self, collection: &str) -> bool {
            self.0.has_collection(collection)
        }

        fn indexes_for(&self, collection: &str) -> Vec<IndexDescriptor> {
            self.0.indexes_for(collection)
        }

        fn document_count_estimate(&self, collection: &str) -> Option<u64> {
            self.0.document_count_estimate(collection)
        }

        fn shard_map_for(&self, _collection: &str) -> Option<ShardMap> {
            None
        }
    }

    #[test]
    fn test_rule_errors() {
        let catalog = NoTopology(catalog());
        let config = OptimizerConfig::cluster();
        let error = Optimizer::new(&catalog, &config)
            .optimize(plan("FOR x IN a RETURN x", &catalog))
            .unwrap_err();
        assert_eq!(error, PlanError::UnknownShardTopology("a".to_string()));

        let rule = rule_by_name("use-indexes").unwrap();
        let wrapped = rule_failure(rule, PlanError::UnknownCollection("c".to_string()));
        assert_eq!(
            wrapped,
            PlanError::OptimizationFailed {
                rule: "use-indexes".to_string(),
                reason: "Collection not found: c".to_string(),
            }
        );
        assert_eq!(
            rule_failure(rule, PlanError::NoCandidatePlans),
            PlanError::NoCandidatePlans
        );
    }
}
