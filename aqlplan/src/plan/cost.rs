// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cost and cardinality estimation for execution plans
//!
//! Every node's estimate is a pure function of its dependency's estimate,
//! the node's own parameters and catalog snapshots. Item counts are integral;
//! fractional products (selectivities) are rounded up so that a lookup which
//! may match never estimates zero rows. Cost is the real-valued field and
//! accumulates along the dependency chain, so the Return node's cost is the
//! cost of the whole plan.

use crate::catalog::{Catalog, IndexType};
use crate::plan::error::{PlanError, PlanResult};
use crate::plan::execution_plan::Plan;
use crate::plan::expression::{Expr, VarId};
use crate::plan::index_selection;
use crate::plan::node::{NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Estimate attached to a plan node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub estimated_nr_items: u64,
    pub estimated_cost: f64,
}

impl CostEstimate {
    pub fn new(estimated_nr_items: u64, estimated_cost: f64) -> Self {
        Self {
            estimated_nr_items,
            estimated_cost,
        }
    }

    fn items(&self) -> f64 {
        self.estimated_nr_items as f64
    }
}

/// Cost model constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostModel {
    /// Cost per document produced by a full collection scan
    pub per_document_enumeration_cost: f64,
    /// Cost per document produced by an index lookup
    pub per_index_lookup_cost: f64,
    /// Assumed length of lists whose length is unknown at planning time
    pub default_list_estimate: u64,
    /// Cost per row skipped by a LIMIT offset
    pub limit_skip_cost: f64,
    /// Fraction of rows assumed to pass a FILTER
    pub default_filter_selectivity: f64,
    /// Factor applied to index lookups ending in a range condition
    pub range_selectivity: f64,
    /// Absolute cost of a node that is known to produce nothing
    pub no_results_cost: f64,
}

impl CostModel {
    pub fn new() -> Self {
        Self {
            per_document_enumeration_cost: 1.0,
            per_index_lookup_cost: 0.5,
            default_list_estimate: 100,
            limit_skip_cost: 0.000001,
            default_filter_selectivity: 1.0,
            range_selectivity: 0.5,
            no_results_cost: 0.5,
        }
    }

    /// Estimate one node from the current estimates of its dependency and,
    /// for subqueries, of the nested plan
    pub fn estimate_node(
        &self,
        plan: &Plan,
        id: NodeId,
        catalog: &dyn Catalog,
    ) -> PlanResult<CostEstimate> {
        let node = plan.get(id)?;

        if let NodeKind::Singleton = node.kind {
            return Ok(CostEstimate::new(1, 1.0));
        }
        if let NodeKind::NoResults = node.kind {
            return Ok(CostEstimate::new(0, self.no_results_cost));
        }

        let dependency = node.dependency().ok_or_else(|| {
            PlanError::InvalidQuery(format!(
                "{} {} has no dependency",
                node.type_name(),
                id
            ))
        })?;
        let input = estimate_of(plan, id, dependency)?;

        let estimate = match &node.kind {
            NodeKind::Singleton | NodeKind::NoResults => input,

            NodeKind::EnumerateCollection { collection, .. } => {
                let count = document_count(catalog, collection)?;
                let items = input.estimated_nr_items.saturating_mul(count);
                CostEstimate::new(
                    items,
                    input.estimated_cost + items as f64 * self.per_document_enumeration_cost,
                )
            }

            NodeKind::EnumerateList { in_var, .. } => {
                let length = self.list_length(plan, id, *in_var)?;
                let items = input.estimated_nr_items.saturating_mul(length);
                CostEstimate::new(items, input.estimated_cost + items as f64)
            }

            NodeKind::Index {
                collection,
                lookups,
                fulltext,
                ..
            } => {
                let count = document_count(catalog, collection)?;
                let per_row = match fulltext {
                    Some(lookup) => {
                        let matches = count as f64 * lookup.index.selectivity_estimate;
                        match lookup.limit.as_ref().and_then(constant_u64) {
                            Some(limit) => matches.min(limit as f64),
                            None => matches,
                        }
                    }
                    None => lookups
                        .iter()
                        .map(|lookup| {
                            index_selection::estimate_lookup_items(
                                &lookup.index,
                                &lookup.terms,
                                count,
                                self,
                            )
                        })
                        .sum::<f64>()
                        .min(count as f64),
                };
                let items = ceil_items(input.items() * per_row);
                CostEstimate::new(
                    items,
                    input.estimated_cost + items as f64 * self.per_index_lookup_cost,
                )
            }

            NodeKind::Filter { .. } => CostEstimate::new(
                ceil_items(input.items() * self.default_filter_selectivity),
                input.estimated_cost + input.items(),
            ),

            NodeKind::Calculation { .. } | NodeKind::Return { .. } => CostEstimate::new(
                input.estimated_nr_items,
                input.estimated_cost + input.items(),
            ),

            NodeKind::Sort { .. } => {
                let n = input.items();
                let sort_cost = if input.estimated_nr_items <= 3 {
                    n
                } else {
                    n * n.log2()
                };
                CostEstimate::new(input.estimated_nr_items, input.estimated_cost + sort_cost)
            }

            NodeKind::Limit { offset, limit, .. } => {
                let skipped = (*offset).min(input.estimated_nr_items);
                let items = (*limit).min(input.estimated_nr_items - skipped);
                CostEstimate::new(
                    items,
                    input.estimated_cost + skipped as f64 * self.limit_skip_cost + items as f64,
                )
            }

            NodeKind::Collect(spec) => {
                let constant_groups = spec.groups.iter().all(|group| {
                    matches!(plan.calculation_of(group.in_var), Some(expr) if expr.is_constant())
                });
                let items = if spec.groups.is_empty() {
                    1
                } else if constant_groups {
                    input.estimated_nr_items.min(1)
                } else {
                    input.estimated_nr_items
                };
                CostEstimate::new(items, input.estimated_cost + input.items())
            }

            NodeKind::Subquery { body, .. } => {
                let body_estimate = estimate_of(plan, id, *body)?;
                CostEstimate::new(
                    input.estimated_nr_items,
                    input.estimated_cost + input.items() * body_estimate.estimated_cost,
                )
            }

            NodeKind::Traversal(spec) => {
                let edges = document_count(catalog, &spec.edge_collection)?;
                let fan_out = catalog
                    .indexes_for(&spec.edge_collection)
                    .iter()
                    .find(|index| index.index_type == IndexType::Edge)
                    .map(|index| index.selectivity_estimate * edges as f64)
                    .unwrap_or(edges as f64)
                    .max(1.0);
                let paths: f64 = (spec.min_depth..=spec.max_depth)
                    .map(|depth| fan_out.powi(depth.min(i32::MAX as u64) as i32))
                    .sum();
                let items = ceil_items(input.items() * paths);
                CostEstimate::new(items, input.estimated_cost + items as f64)
            }

            NodeKind::Gather { .. }
            | NodeKind::Scatter { .. }
            | NodeKind::Distribute { .. }
            | NodeKind::Remote => input,
        };

        log::trace!(
            "Estimated {} {}: {} items, cost {}",
            node.type_name(),
            id,
            estimate.estimated_nr_items,
            estimate.estimated_cost
        );
        Ok(estimate)
    }

    /// Statically known length of the list an EnumerateList node iterates
    fn list_length(&self, plan: &Plan, node: NodeId, var: VarId) -> PlanResult<u64> {
        let Some(setter) = plan.var_setter(var) else {
            return Ok(self.default_list_estimate);
        };
        match &plan.get(setter)?.kind {
            NodeKind::Calculation { expression, .. } => Ok(self
                .expression_length(expression)
                .unwrap_or(self.default_list_estimate)),
            NodeKind::Subquery { body, .. } => {
                Ok(estimate_of(plan, node, *body)?.estimated_nr_items)
            }
            _ => Ok(self.default_list_estimate),
        }
    }

    fn expression_length(&self, expression: &Expr) -> Option<u64> {
        match expression {
            Expr::Array(items) => Some(items.len() as u64),
            Expr::Range { low, high } => {
                let low = constant_i64(low)?;
                let high = constant_i64(high)?;
                Some(high.abs_diff(low).saturating_add(1))
            }
            other => match other.evaluate_constant()? {
                Value::Array(items) => Some(items.len() as u64),
                _ => None,
            },
        }
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new()
    }
}

fn estimate_of(plan: &Plan, node: NodeId, dependency: NodeId) -> PlanResult<CostEstimate> {
    plan.get(dependency)?
        .estimate
        .ok_or(PlanError::UnestimatedDependency { node, dependency })
}

fn document_count(catalog: &dyn Catalog, collection: &str) -> PlanResult<u64> {
    catalog
        .document_count_estimate(collection)
        .ok_or_else(|| PlanError::UnknownCollection(collection.to_string()))
}

fn ceil_items(items: f64) -> u64 {
    // `as` saturates for values beyond u64::MAX
    items.max(0.0).ceil() as u64
}

fn constant_i64(expr: &Expr) -> Option<i64> {
    expr.evaluate_constant()?.as_f64().map(|f| f as i64)
}

fn constant_u64(expr: &Expr) -> Option<u64> {
    expr.evaluate_constant()?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionDefinition, MemoryCatalog};
    use serde_json::json;

    fn range_plan(offset: u64, limit: u64) -> Plan {
        bounded_range_plan(json!(1), json!(10000), offset, limit)
    }

    fn bounded_range_plan(low: Value, high: Value, offset: u64, limit: u64) -> Plan {
        let mut plan = Plan::new();
        let range = plan.variables_mut().create_temporary();
        let i = plan.variables_mut().create("i");
        let singleton = plan.root();
        let calc = plan
            .add_node(
                NodeKind::Calculation {
                    out_var: range,
                    expression: Expr::Range {
                        low: Box::new(Expr::Value(low)),
                        high: Box::new(Expr::Value(high)),
                    },
                },
                vec![singleton],
            )
            .unwrap();
        let list = plan
            .add_node(
                NodeKind::EnumerateList {
                    in_var: range,
                    out_var: i,
                },
                vec![calc],
            )
            .unwrap();
        let limit = plan
            .add_node(
                NodeKind::Limit {
                    offset,
                    limit,
                    full_count: false,
                },
                vec![list],
            )
            .unwrap();
        let ret = plan
            .add_node(NodeKind::Return { in_var: i }, vec![limit])
            .unwrap();
        plan.set_root(ret).unwrap();
        plan
    }

    fn limit_estimate(offset: u64, limit: u64) -> CostEstimate {
        let catalog = MemoryCatalog::new();
        let mut plan = range_plan(offset, limit);
        plan.estimate_costs(&CostModel::new(), &catalog).unwrap();
        let limit_node = plan
            .find_nodes(|node| matches!(node.kind, NodeKind::Limit { .. }), false)[0];
        plan.get(limit_node).unwrap().estimate.unwrap()
    }

    #[test]
    fn test_limit_cost_table() {
        let none = limit_estimate(0, 0);
        assert_eq!(none.estimated_nr_items, 0);
        assert_eq!(none.estimated_cost, 10002.0);

        let all = limit_estimate(0, 10000);
        assert_eq!(all.estimated_nr_items, 10000);
        assert_eq!(all.estimated_cost, 20002.0);

        let skipped = limit_estimate(10000, 10);
        assert_eq!(skipped.estimated_nr_items, 0);
        assert!((skipped.estimated_cost - 10002.01).abs() < 1e-9);
    }

    #[test]
    fn test_widest_range_saturates() {
        let catalog = MemoryCatalog::new();
        let mut plan = bounded_range_plan(json!(i64::MIN), json!(i64::MAX), 0, 10);
        plan.estimate_costs(&CostModel::new(), &catalog).unwrap();
        let list = plan.find_nodes(
            |node| matches!(node.kind, NodeKind::EnumerateList { .. }),
            false,
        )[0];
        assert_eq!(
            plan.get(list).unwrap().estimate.unwrap().estimated_nr_items,
            u64::MAX
        );
        assert_eq!(plan.root_estimate().unwrap().estimated_nr_items, 10);
    }

    #[test]
    fn test_unestimated_dependency() {
        let catalog = MemoryCatalog::new();
        let plan = range_plan(0, 1);
        let list = plan.find_nodes(
            |node| matches!(node.kind, NodeKind::EnumerateList { .. }),
            false,
        )[0];
        let err = CostModel::new()
            .estimate_node(&plan, list, &catalog)
            .unwrap_err();
        assert!(matches!(err, PlanError::UnestimatedDependency { .. }));
        assert!(err.is_internal());
    }

    #[test]
    fn test_collection_scan_and_sort() {
        let catalog = MemoryCatalog::new();
        catalog
            .create_collection(CollectionDefinition::new("docs").with_documents(
                (0..8).map(|i| json!({ "value": i })).collect(),
            ))
            .unwrap();

        let mut plan = Plan::new();
        let doc = plan.variables_mut().create("doc");
        let scan = plan
            .add_node(
                NodeKind::EnumerateCollection {
                    collection: "docs".to_string(),
                    out_var: doc,
                    random: false,
                },
                vec![plan.root()],
            )
            .unwrap();
        let sort = plan
            .add_node(
                NodeKind::Sort {
                    elements: vec![crate::plan::node::SortElement::new(doc, true)],
                },
                vec![scan],
            )
            .unwrap();
        let ret = plan
            .add_node(NodeKind::Return { in_var: doc }, vec![sort])
            .unwrap();
        plan.set_root(ret).unwrap();
        plan.estimate_costs(&CostModel::new(), &catalog).unwrap();

        let scan_estimate = plan.get(scan).unwrap().estimate.unwrap();
        assert_eq!(scan_estimate, CostEstimate::new(8, 9.0));
        // 8 * log2(8) = 24
        let sort_estimate = plan.get(sort).unwrap().estimate.unwrap();
        assert_eq!(sort_estimate, CostEstimate::new(8, 33.0));
        assert_eq!(plan.total_cost(), 41.0);
    }

    #[test]
    fn test_model_from_partial_json() {
        let model: CostModel =
            serde_json::from_str(r#"{ "defaultListEstimate": 10 }"#).unwrap();
        assert_eq!(model.default_list_estimate, 10);
        assert_eq!(model.per_index_lookup_cost, 0.5);
    }
}
