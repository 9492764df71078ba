// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rules that answer filters, sorts and FULLTEXT calls with indexes

use super::general::rewrite;
use super::{Rewrite, RuleContext};
use crate::ast::BinaryOperator;
use crate::catalog::IndexType;
use crate::plan::error::{PlanError, PlanResult};
use crate::plan::execution_plan::Plan;
use crate::plan::expression::{Expr, VarId};
use crate::plan::index_selection::{
    find_fulltext_index, normalize_condition, select_index, supports_sort, TermOperator,
};
use crate::plan::node::{FulltextLookup, IndexLookup, IndexSort, NodeId, NodeKind, PlanNode};

fn is_collection_scan(node: &PlanNode) -> bool {
    matches!(node.kind, NodeKind::EnumerateCollection { .. })
}

fn is_index_lookup(node: &PlanNode) -> bool {
    matches!(
        &node.kind,
        NodeKind::Index { lookups, fulltext: None, .. } if !lookups.is_empty()
    )
}

fn usage_count(plan: &Plan, var: VarId) -> usize {
    plan.nodes()
        .filter(|node| plan.variables_used_by(node.id).contains(&var))
        .count()
}

/// Conditions of the filters that apply to the rows produced by `id`: all
/// filters above it up to the next LIMIT, COLLECT or RETURN
fn filter_conditions_above(plan: &Plan, id: NodeId) -> Vec<(NodeId, Expr)> {
    let mut conditions = Vec::new();
    let mut current = plan.parent_of(id);
    while let Some(parent) = current {
        match plan.node(parent).map(|node| &node.kind) {
            Some(NodeKind::Filter { in_var }) => {
                if let Some(condition) = plan.calculation_of(*in_var) {
                    conditions.push((parent, condition.clone()));
                }
            }
            Some(
                NodeKind::Limit { .. }
                | NodeKind::Collect(_)
                | NodeKind::Return { .. }
                | NodeKind::NoResults,
            )
            | None => break,
            Some(_) => {}
        }
        current = plan.parent_of(parent);
    }
    conditions
}

/// FULLTEXT calculations enumerated by exactly one FOR loop
fn fulltext_candidates(plan: &Plan) -> Vec<(NodeId, NodeId)> {
    plan.find_nodes(|node| matches!(node.kind, NodeKind::EnumerateList { .. }), true)
        .into_iter()
        .filter_map(|list| {
            let NodeKind::EnumerateList { in_var, .. } = plan.node(list)?.kind else {
                return None;
            };
            let setter = plan.var_setter(in_var)?;
            let is_fulltext = matches!(
                &plan.node(setter)?.kind,
                NodeKind::Calculation { expression: Expr::Function { name, .. }, .. } if name == "FULLTEXT"
            );
            (is_fulltext && usage_count(plan, in_var) == 1).then_some((list, setter))
        })
        .collect()
}

pub fn has_fulltext_call(plan: &Plan, _: &RuleContext) -> bool {
    !fulltext_candidates(plan).is_empty()
}

/// `FOR d IN FULLTEXT(coll, attr, query)` becomes a fulltext index lookup
pub fn replace_function_with_index(mut plan: Plan, ctx: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for (list, setter) in fulltext_candidates(&plan) {
        let NodeKind::EnumerateList { out_var, .. } = plan.get(list)?.kind else {
            continue;
        };
        let NodeKind::Calculation {
            expression: Expr::Function { arguments, .. },
            ..
        } = &plan.get(setter)?.kind
        else {
            continue;
        };
        let (Some(Expr::Collection(collection)), Some(attribute), Some(query)) =
            (arguments.first(), arguments.get(1), arguments.get(2))
        else {
            continue;
        };
        if !ctx.catalog.has_collection(collection) {
            return Err(PlanError::UnknownCollection(collection.clone()));
        }
        let Some(attribute) = attribute.evaluate_constant() else {
            continue;
        };
        let Some(attribute) = attribute.as_str() else {
            continue;
        };

        let indexes = ctx.catalog.indexes_for(collection);
        let Some(index) = find_fulltext_index(&indexes, attribute) else {
            log::debug!(
                "No fulltext index on {}.{}, keeping FULLTEXT call",
                collection,
                attribute
            );
            continue;
        };
        let kind = NodeKind::Index {
            collection: collection.clone(),
            out_var,
            lookups: Vec::new(),
            fulltext: Some(FulltextLookup {
                index: index.clone(),
                query: query.clone(),
                limit: arguments.get(3).cloned(),
            }),
            sort: None,
        };
        plan.replace_node(list, kind)?;
        plan.unlink_node(setter)?;
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

pub fn has_filtered_collection_scan(plan: &Plan, _: &RuleContext) -> bool {
    plan.find_nodes(is_collection_scan, true)
        .into_iter()
        .any(|scan| !filter_conditions_above(plan, scan).is_empty())
}

/// AND of all conditions, `None` when there are none
fn conjunction(conditions: Vec<(NodeId, Expr)>) -> Option<Expr> {
    conditions
        .into_iter()
        .map(|(_, condition)| condition)
        .reduce(|left, right| Expr::binary(BinaryOperator::And, left, right))
}

/// Replace collection scans by index lookups when the filters above them
/// can be answered by indexes, one lookup per OR branch
pub fn use_indexes(mut plan: Plan, ctx: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for scan in plan.find_nodes(is_collection_scan, true) {
        let NodeKind::EnumerateCollection {
            collection,
            out_var,
            random: false,
        } = plan.get(scan)?.kind.clone()
        else {
            continue;
        };
        let Some(condition) = conjunction(filter_conditions_above(&plan, scan)) else {
            continue;
        };
        let available = plan.variables_available_at(scan);
        let Some(normalized) = normalize_condition(&condition, out_var, &available) else {
            continue;
        };
        let count = ctx
            .catalog
            .document_count_estimate(&collection)
            .ok_or_else(|| PlanError::UnknownCollection(collection.clone()))?;
        let indexes = ctx.catalog.indexes_for(&collection);

        let lookups: Option<Vec<IndexLookup>> = normalized
            .disjuncts
            .iter()
            .map(|disjunct| {
                select_index(&indexes, disjunct, count, &ctx.config.cost_model)
                    .map(|(index, terms, _)| IndexLookup { index, terms })
            })
            .collect();
        let Some(lookups) = lookups else {
            continue;
        };

        log::debug!(
            "Using {} for {}",
            lookups
                .iter()
                .map(|lookup| lookup.index.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            collection
        );
        plan.replace_node(
            scan,
            NodeKind::Index {
                collection,
                out_var,
                lookups,
                fulltext: None,
                sort: None,
            },
        )?;
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

pub fn has_index_lookup(plan: &Plan, _: &RuleContext) -> bool {
    plan.nodes().any(is_index_lookup)
}

/// Remove filters whose every OR branch is answered exactly by the
/// matching index lookup
pub fn remove_filter_covered_by_index(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for id in plan.find_nodes(is_index_lookup, true) {
        let NodeKind::Index {
            out_var, lookups, ..
        } = plan.get(id)?.kind.clone()
        else {
            continue;
        };
        let available = plan.variables_available_at(id);
        for (filter, condition) in filter_conditions_above(&plan, id) {
            let Some(normalized) = normalize_condition(&condition, out_var, &available) else {
                continue;
            };
            let covered = normalized.complete
                && normalized.disjuncts.len() == lookups.len()
                && normalized
                    .disjuncts
                    .iter()
                    .zip(&lookups)
                    .all(|(terms, lookup)| terms.iter().all(|term| lookup.terms.contains(term)));
            if covered {
                plan.unlink_node(filter)?;
                modified = true;
            }
        }
    }
    Ok(rewrite(plan, modified))
}

/// Node producing `var` reached from a Sort through calculations and
/// filters only
fn sorted_source(plan: &Plan, sort: NodeId, var: VarId) -> PlanResult<Option<NodeId>> {
    let mut below = plan.get(sort)?.dependency();
    while let Some(id) = below {
        let node = plan.get(id)?;
        match &node.kind {
            NodeKind::Calculation { .. } | NodeKind::Filter { .. } => below = node.dependency(),
            NodeKind::EnumerateCollection { out_var, .. } | NodeKind::Index { out_var, .. }
                if *out_var == var =>
            {
                return Ok(Some(id))
            }
            _ => return Ok(None),
        }
    }
    Ok(None)
}

/// Index node kind that produces the documents of `source` in the order
/// `order`, if any index can
fn sorted_access(
    plan: &Plan,
    source: NodeId,
    order: &IndexSort,
    ctx: &RuleContext,
) -> PlanResult<Option<NodeKind>> {
    match plan.get(source)?.kind.clone() {
        NodeKind::EnumerateCollection {
            collection,
            out_var,
            random: false,
        } => {
            let index = ctx
                .catalog
                .indexes_for(&collection)
                .into_iter()
                .find(|index| supports_sort(index, &[], &order.paths));
            Ok(index.map(|index| NodeKind::Index {
                collection,
                out_var,
                lookups: vec![IndexLookup {
                    index,
                    terms: Vec::new(),
                }],
                fulltext: None,
                sort: Some(order.clone()),
            }))
        }
        NodeKind::Index {
            collection,
            out_var,
            mut lookups,
            fulltext: None,
            sort: None,
        } if lookups.len() == 1 => {
            let lookup = &lookups[0];
            if lookup.index.index_type != IndexType::Persistent
                || lookup
                    .terms
                    .iter()
                    .any(|term| term.operator == TermOperator::In)
            {
                return Ok(None);
            }
            let bound: Vec<Vec<String>> = lookup
                .terms
                .iter()
                .filter(|term| term.operator == TermOperator::Eq)
                .map(|term| term.path.clone())
                .collect();
            if !supports_sort(&lookup.index, &bound, &order.paths) {
                return Ok(None);
            }
            let lookup = lookups.remove(0);
            Ok(Some(NodeKind::Index {
                collection,
                out_var,
                lookups: vec![lookup],
                fulltext: None,
                sort: Some(order.clone()),
            }))
        }
        _ => Ok(None),
    }
}

/// Requested order of a Sort when every criterion is an attribute of the
/// same variable, sorted in the same direction
fn requested_order(plan: &Plan, sort: NodeId) -> PlanResult<Option<(VarId, IndexSort)>> {
    let NodeKind::Sort { elements } = &plan.get(sort)?.kind else {
        return Ok(None);
    };
    let Some(first) = elements.first() else {
        return Ok(None);
    };
    let mut var = None;
    let mut paths = Vec::with_capacity(elements.len());
    for element in elements {
        if element.ascending != first.ascending {
            return Ok(None);
        }
        let resolved = match plan.calculation_of(element.var) {
            Some(expression) => expression.attribute_path(),
            None => Some((element.var, Vec::new())),
        };
        let Some((source, mut path)) = resolved else {
            return Ok(None);
        };
        if var.is_some_and(|v| v != source) {
            return Ok(None);
        }
        var = Some(source);
        path.extend(element.path.iter().cloned());
        if path.is_empty() {
            return Ok(None);
        }
        paths.push(path);
    }
    Ok(var.map(|var| {
        (
            var,
            IndexSort {
                ascending: first.ascending,
                paths,
            },
        )
    }))
}

/// Let a sorted index produce the order of a SORT and drop the Sort, when
/// that makes the plan cheaper
pub fn use_index_for_sort(mut plan: Plan, ctx: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for sort in plan.find_nodes(|node| matches!(node.kind, NodeKind::Sort { .. }), true) {
        let Some((var, order)) = requested_order(&plan, sort)? else {
            continue;
        };
        let Some(source) = sorted_source(&plan, sort, var)? else {
            continue;
        };
        let Some(kind) = sorted_access(&plan, source, &order, ctx)? else {
            continue;
        };

        let mut candidate = plan.clone();
        candidate.replace_node(source, kind)?;
        candidate.unlink_node(sort)?;
        candidate.estimate_costs(&ctx.config.cost_model, ctx.catalog)?;
        if candidate.total_cost() < plan.total_cost() {
            plan = candidate;
            modified = true;
        }
    }
    Ok(rewrite(plan, modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_query;
    use crate::catalog::{CollectionDefinition, IndexDefinition, MemoryCatalog};
    use crate::config::OptimizerConfig;
    use crate::plan::builder::build_plan;
    use serde_json::json;

    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        let documents = (0..100)
            .map(|i| json!({ "value": i, "group": i % 10, "text": "hello world" }))
            .collect();
        catalog
            .create_collection(
                CollectionDefinition::new("values")
                    .with_index(IndexDefinition::persistent(&["value"]))
                    .with_index(IndexDefinition::fulltext("text", 2))
                    .with_documents(documents),
            )
            .unwrap();
        catalog
    }

    fn estimated(query: &str, catalog: &MemoryCatalog, config: &OptimizerConfig) -> Plan {
        let mut plan = build_plan(&parse_query(query).unwrap(), catalog, false).unwrap();
        plan.estimate_costs(&config.cost_model, catalog).unwrap();
        plan
    }

    fn modified(rewrite: Rewrite) -> Plan {
        match rewrite {
            Rewrite::Modified(plan) => plan,
            other => panic!("expected a modified plan, got {:?}", other),
        }
    }

    fn count(plan: &Plan, type_name: &str) -> usize {
        plan.nodes().filter(|node| node.type_name() == type_name).count()
    }

    #[test]
    fn test_use_indexes_and_remove_covered_filter() {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let plan = estimated("FOR d IN values FILTER d.value == 7 RETURN d", &catalog, &config);
        assert!(has_filtered_collection_scan(&plan, &ctx));
        let plan = modified(use_indexes(plan, &ctx).unwrap());
        assert_eq!(count(&plan, "IndexNode"), 1);
        assert!(has_index_lookup(&plan, &ctx));

        let plan = modified(remove_filter_covered_by_index(plan, &ctx).unwrap());
        assert_eq!(count(&plan, "FilterNode"), 0);
        plan.validate().unwrap();
    }

    #[test]
    fn test_partially_covered_filter_stays() {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let plan = estimated(
            "FOR d IN values FILTER d.value == 7 && d.group == 7 RETURN d",
            &catalog,
            &config,
        );
        let plan = modified(use_indexes(plan, &ctx).unwrap());
        let rewritten = remove_filter_covered_by_index(plan, &ctx).unwrap();
        assert!(matches!(rewritten, Rewrite::Unchanged(_)));
    }

    #[test]
    fn test_unindexed_or_branch_keeps_scan() {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let plan = estimated(
            "FOR d IN values FILTER d.value == 7 || d.group == 2 RETURN d",
            &catalog,
            &config,
        );
        assert!(matches!(use_indexes(plan, &ctx).unwrap(), Rewrite::Unchanged(_)));
    }

    #[test]
    fn test_fulltext_call_becomes_index() {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let plan = estimated(
            "FOR d IN FULLTEXT(values, 'text', 'hello') RETURN d",
            &catalog,
            &config,
        );
        assert!(has_fulltext_call(&plan, &ctx));
        let plan = modified(replace_function_with_index(plan, &ctx).unwrap());
        assert_eq!(count(&plan, "IndexNode"), 1);
        assert_eq!(count(&plan, "EnumerateListNode"), 0);
        plan.validate().unwrap();

        // no index on the attribute
        let plan = estimated(
            "FOR d IN FULLTEXT(values, 'other', 'hello') RETURN d",
            &catalog,
            &config,
        );
        assert!(matches!(
            replace_function_with_index(plan, &ctx).unwrap(),
            Rewrite::Unchanged(_)
        ));
    }

    #[test]
    fn test_sort_answered_by_index() {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let plan = estimated("FOR d IN values SORT d.value RETURN d", &catalog, &config);
        let before = plan.total_cost();
        let mut plan = modified(use_index_for_sort(plan, &ctx).unwrap());
        assert_eq!(count(&plan, "SortNode"), 0);
        plan.estimate_costs(&config.cost_model, &catalog).unwrap();
        assert!(plan.total_cost() < before);

        // mixed directions need a real sort
        let plan = estimated(
            "FOR d IN values SORT d.value ASC, d.group DESC RETURN d",
            &catalog,
            &config,
        );
        assert!(matches!(
            use_index_for_sort(plan, &ctx).unwrap(),
            Rewrite::Unchanged(_)
        ));
    }
}
