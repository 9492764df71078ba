// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cluster rules
//!
//! `scatter-in-cluster` wraps every document access, in the main chain and
//! in subquery chains, in a distribution region:
//!
//! ```text
//! Gather <- Remote <- access <- Remote <- Scatter|Distribute <- below
//! ```
//!
//! The rules after it push work from the coordinator into the region below
//! the upper Remote, collapse regions that are not needed and drop merge
//! sorting that a later SORT makes pointless.

use super::general::rewrite;
use super::{Rewrite, RuleContext};
use crate::catalog::ShardMap;
use crate::plan::distribution::{is_one_shard_plan, merge_order, shard_map, sort_mode_for};
use crate::plan::error::PlanResult;
use crate::plan::execution_plan::Plan;
use crate::plan::expression::Expr;
use crate::plan::index_selection::TermOperator;
use crate::plan::node::{NodeId, NodeKind, PlanNode, SortElement};

fn is_gather(node: &PlanNode) -> bool {
    matches!(node.kind, NodeKind::Gather { .. })
}

/// Document accesses not yet inside a distribution region
fn undistributed_accesses(plan: &Plan) -> Vec<NodeId> {
    plan.find_nodes(
        |node| {
            let access = matches!(
                node.kind,
                NodeKind::EnumerateCollection { .. } | NodeKind::Index { .. }
            );
            let distributed = node
                .dependency()
                .and_then(|dependency| plan.node(dependency))
                .map(|dependency| matches!(dependency.kind, NodeKind::Remote))
                .unwrap_or(false);
            access && !distributed
        },
        true,
    )
}

pub fn has_undistributed_access(plan: &Plan, ctx: &RuleContext) -> bool {
    undistributed_accesses(plan).into_iter().any(|id| {
        let collection = plan.node(id).and_then(|node| node.kind.collection());
        // unknown topologies are reported by the rewriter
        match collection.and_then(|c| ctx.catalog.shard_map_for(c)) {
            Some(map) => !map.satellite,
            None => true,
        }
    })
}

/// Shard key values of an index access that pins a single shard
fn shard_key_values(kind: &NodeKind, map: &ShardMap) -> Option<Vec<Expr>> {
    let NodeKind::Index {
        lookups,
        fulltext: None,
        ..
    } = kind
    else {
        return None;
    };
    let [lookup] = lookups.as_slice() else {
        return None;
    };
    map.shard_keys
        .iter()
        .map(|key| {
            lookup
                .terms
                .iter()
                .find(|term| term.operator == TermOperator::Eq && term.field() == *key)
                .map(|term| term.value.clone())
        })
        .collect()
}

/// Merge order of a Gather above an access that produces sorted output
fn access_order(kind: &NodeKind) -> Vec<SortElement> {
    match kind {
        NodeKind::Index {
            out_var,
            sort: Some(order),
            ..
        } => order
            .paths
            .iter()
            .map(|path| SortElement {
                var: *out_var,
                ascending: order.ascending,
                path: path.clone(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Wrap collection accesses in Scatter/Remote/Gather regions
pub fn scatter_in_cluster(mut plan: Plan, ctx: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for id in undistributed_accesses(&plan) {
        let kind = plan.get(id)?.kind.clone();
        let Some(collection) = kind.collection().map(str::to_string) else {
            continue;
        };
        let map = shard_map(ctx.catalog, &collection)?;
        if map.satellite {
            continue;
        }
        let dependencies = plan.get(id)?.dependencies.clone();

        let entry = match shard_key_values(&kind, &map) {
            Some(keys) => NodeKind::Distribute {
                collection: collection.clone(),
                keys,
            },
            None => NodeKind::Scatter {
                collection: collection.clone(),
            },
        };
        let entry = plan.add_node(entry, dependencies)?;
        let lower_remote = plan.add_node(NodeKind::Remote, vec![entry])?;
        plan.get_mut(id)?.dependencies = vec![lower_remote];

        let upper_remote = plan.add_node(NodeKind::Remote, Vec::new())?;
        plan.insert_above(id, upper_remote)?;

        let shards = map.number_of_shards();
        let elements = merge_order(access_order(&kind), shards);
        let gather = plan.add_node(
            NodeKind::Gather {
                collection: collection.clone(),
                sort_mode: sort_mode_for(&elements, shards, ctx.config.gather_heap_threshold),
                elements,
                shards,
            },
            Vec::new(),
        )?;
        plan.insert_above(upper_remote, gather)?;
        log::debug!(
            "Distributed access {} to {} over {} shards",
            id,
            collection,
            shards
        );
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

pub fn has_distribution(plan: &Plan, _: &RuleContext) -> bool {
    plan.nodes().any(|node| node.kind.is_distribution())
}

/// Plans touching only single-shard collections run entirely on one server
pub fn cluster_one_shard(mut plan: Plan, ctx: &RuleContext) -> PlanResult<Rewrite> {
    if !is_one_shard_plan(&plan, ctx.catalog)? {
        return Ok(Rewrite::Unchanged(plan));
    }
    let distribution = plan.find_nodes(|node| node.kind.is_distribution(), true);
    for id in &distribution {
        plan.unlink_node(*id)?;
    }
    Ok(rewrite(plan, !distribution.is_empty()))
}

pub fn has_gather(plan: &Plan, _: &RuleContext) -> bool {
    plan.nodes().any(is_gather)
}

/// Remote node directly below a Gather
fn region_top(plan: &Plan, gather: NodeId) -> Option<NodeId> {
    let remote = plan.node(gather)?.dependency()?;
    matches!(plan.node(remote)?.kind, NodeKind::Remote).then_some(remote)
}

/// Move calculations and filters that only need shard-local data below
/// the Gather
pub fn distribute_filtercalc_to_cluster(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for gather in plan.find_nodes(is_gather, true) {
        let Some(remote) = region_top(&plan, gather) else {
            continue;
        };
        while let Some(parent) = plan.parent_of(gather) {
            let movable = match &plan.get(parent)?.kind {
                NodeKind::Calculation { expression, .. } => expression.is_deterministic(),
                NodeKind::Filter { .. } => true,
                _ => false,
            };
            let available = plan.variables_available_at(gather);
            if !movable || !plan.variables_used_by(parent).is_subset(&available) {
                break;
            }
            plan.move_below(parent, remote)?;
            modified = true;
        }
    }
    Ok(rewrite(plan, modified))
}

/// Sort on the shards and merge the sorted streams in the Gather
pub fn distribute_sort_to_cluster(mut plan: Plan, ctx: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for gather in plan.find_nodes(is_gather, true) {
        let Some(remote) = region_top(&plan, gather) else {
            continue;
        };
        let Some(parent) = plan.parent_of(gather) else {
            continue;
        };
        let NodeKind::Sort { elements } = plan.get(parent)?.kind.clone() else {
            continue;
        };
        let available = plan.variables_available_at(gather);
        if !elements.iter().all(|element| available.contains(&element.var)) {
            continue;
        }
        let NodeKind::Gather {
            elements: merge, ..
        } = &plan.get(gather)?.kind
        else {
            continue;
        };
        if !merge.is_empty() {
            continue;
        }

        plan.move_below(parent, remote)?;
        if let NodeKind::Gather {
            elements: merge,
            sort_mode,
            shards,
            ..
        } = &mut plan.get_mut(gather)?.kind
        {
            // one shard stream keeps the order of the moved sort
            let elements = merge_order(elements, *shards);
            *sort_mode = sort_mode_for(&elements, *shards, ctx.config.gather_heap_threshold);
            *merge = elements;
        }
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

pub fn has_scatter(plan: &Plan, _: &RuleContext) -> bool {
    plan.nodes()
        .any(|node| matches!(node.kind, NodeKind::Scatter { .. }))
}

/// Drop the Scatter and its Remote when nothing below them reads data, so
/// the region runs once per shard without a coordinator round trip
pub fn remove_unnecessary_remote_scatter(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    let scatters = plan.find_nodes(
        |node| matches!(node.kind, NodeKind::Scatter { .. }),
        true,
    );
    for scatter in scatters {
        let trivial = plan.execution_order(scatter).iter().all(|id| {
            match plan.node(*id).map(|node| &node.kind) {
                Some(NodeKind::Singleton | NodeKind::Scatter { .. }) => true,
                Some(NodeKind::Calculation { expression, .. }) => expression.is_deterministic(),
                _ => false,
            }
        });
        let Some(remote) = plan.parent_of(scatter) else {
            continue;
        };
        if !trivial || !matches!(plan.get(remote)?.kind, NodeKind::Remote) {
            continue;
        }
        plan.unlink_node(remote)?;
        plan.unlink_node(scatter)?;
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

pub fn has_sorted_gather(plan: &Plan, _: &RuleContext) -> bool {
    plan.nodes().any(|node| {
        matches!(&node.kind, NodeKind::Gather { elements, shards, .. }
            if !elements.is_empty() && *shards > 1)
    })
}

/// A sorted merge is wasted when a later SORT reorders the rows before
/// anything order-sensitive looks at them
pub fn decay_unnecessary_sorted_gather(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for gather in plan.find_nodes(
        |node| {
            matches!(&node.kind, NodeKind::Gather { elements, shards, .. }
                if !elements.is_empty() && *shards > 1)
        },
        true,
    ) {
        let mut current = plan.parent_of(gather);
        let mut resorted = false;
        while let Some(parent) = current {
            match &plan.get(parent)?.kind {
                NodeKind::Sort { .. } => {
                    resorted = true;
                    break;
                }
                NodeKind::Limit { .. } | NodeKind::Return { .. } | NodeKind::Subquery { .. } => {
                    break
                }
                NodeKind::Collect(spec) if spec.into.is_some() => break,
                _ => current = plan.parent_of(parent),
            }
        }
        if !resorted {
            continue;
        }
        if let NodeKind::Gather {
            elements,
            sort_mode,
            ..
        } = &mut plan.get_mut(gather)?.kind
        {
            elements.clear();
            *sort_mode = crate::plan::node::SortMode::Unset;
        }
        log::debug!("Gather {} no longer merges sorted streams", gather);
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_query;
    use crate::catalog::{CollectionDefinition, MemoryCatalog};
    use crate::config::OptimizerConfig;
    use crate::plan::builder::build_plan;
    use crate::plan::error::PlanError;
    use crate::plan::node::SortMode;
    use serde_json::json;

    fn catalog(shards: usize) -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog
            .create_collection(
                CollectionDefinition::new("sharded")
                    .with_shards(shards)
                    .with_documents((0..12).map(|i| json!({ "value": i })).collect()),
            )
            .unwrap();
        catalog
            .create_collection(CollectionDefinition::new("single"))
            .unwrap();
        catalog
            .create_collection(CollectionDefinition::new("sat").with_shards(3).satellite())
            .unwrap();
        catalog
    }

    fn plan(query: &str, catalog: &MemoryCatalog) -> Plan {
        build_plan(&parse_query(query).unwrap(), catalog, false).unwrap()
    }

    fn modified(rewrite: Rewrite) -> Plan {
        match rewrite {
            Rewrite::Modified(plan) => plan,
            other => panic!("expected a modified plan, got {:?}", other),
        }
    }

    fn types(plan: &Plan) -> Vec<&'static str> {
        plan.main_chain()
            .into_iter()
            .map(|id| plan.get(id).unwrap().type_name())
            .collect()
    }

    fn gather(plan: &Plan) -> (Vec<SortElement>, SortMode) {
        plan.nodes()
            .find_map(|node| match &node.kind {
                NodeKind::Gather {
                    elements,
                    sort_mode,
                    ..
                } => Some((elements.clone(), *sort_mode)),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_scatter_region_shape() {
        let catalog = catalog(3);
        let config = OptimizerConfig::cluster();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let query = plan("FOR d IN sharded RETURN d", &catalog);
        assert!(has_undistributed_access(&query, &ctx));
        let distributed = modified(scatter_in_cluster(query, &ctx).unwrap());
        assert_eq!(
            types(&distributed),
            vec![
                "SingletonNode",
                "ScatterNode",
                "RemoteNode",
                "EnumerateCollectionNode",
                "RemoteNode",
                "GatherNode",
                "ReturnNode",
            ]
        );
        distributed.validate().unwrap();
        assert!(!has_undistributed_access(&distributed, &ctx));

        let satellite = plan("FOR d IN sat RETURN d", &catalog);
        assert!(!has_undistributed_access(&satellite, &ctx));
    }

    #[test]
    fn test_subquery_accesses_are_distributed() {
        let catalog = catalog(3);
        let config = OptimizerConfig::cluster();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let query = plan("FOR x IN (FOR d IN sharded RETURN d) RETURN x", &catalog);
        assert!(has_undistributed_access(&query, &ctx));
        let distributed = modified(scatter_in_cluster(query, &ctx).unwrap());
        distributed.validate().unwrap();
        assert!(!has_undistributed_access(&distributed, &ctx));

        let body = distributed.chain_tops()[1];
        let nested: Vec<_> = distributed
            .execution_order(body)
            .into_iter()
            .map(|id| distributed.get(id).unwrap().type_name())
            .collect();
        assert_eq!(
            nested,
            vec![
                "SingletonNode",
                "ScatterNode",
                "RemoteNode",
                "EnumerateCollectionNode",
                "RemoteNode",
                "GatherNode",
                "ReturnNode",
            ]
        );
    }

    #[test]
    fn test_single_shard_gather_keeps_no_merge_order() {
        let catalog = catalog(3);
        let config = OptimizerConfig::cluster();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let query = plan(
            "FOR b IN single SORT b.name FOR a IN sharded SORT a.value RETURN a",
            &catalog,
        );
        let query = modified(scatter_in_cluster(query, &ctx).unwrap());
        let query = modified(distribute_filtercalc_to_cluster(query, &ctx).unwrap());
        let query = modified(distribute_sort_to_cluster(query, &ctx).unwrap());
        let merges: Vec<(usize, usize)> = query
            .nodes()
            .filter_map(|node| match &node.kind {
                NodeKind::Gather {
                    elements, shards, ..
                } => Some((*shards, elements.len())),
                _ => None,
            })
            .collect();
        assert_eq!(merges.len(), 2);
        assert!(merges.contains(&(1, 0)));
        assert!(merges.contains(&(3, 1)));
        assert!(matches!(
            decay_unnecessary_sorted_gather(query, &ctx).unwrap(),
            Rewrite::Unchanged(_)
        ));
    }

    #[test]
    fn test_unknown_topology() {
        let catalog = catalog(3);
        let config = OptimizerConfig::cluster();
        let query = plan("FOR d IN sharded RETURN d", &catalog);
        let empty = MemoryCatalog::new();
        let ctx = RuleContext {
            catalog: &empty,
            config: &config,
        };
        assert_eq!(
            scatter_in_cluster(query, &ctx).unwrap_err(),
            PlanError::UnknownShardTopology("sharded".to_string())
        );
    }

    #[test]
    fn test_one_shard_plans_lose_distribution() {
        let catalog = catalog(1);
        let config = OptimizerConfig::cluster();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let query = plan("FOR d IN sharded RETURN d", &catalog);
        let distributed = modified(scatter_in_cluster(query, &ctx).unwrap());
        let collapsed = modified(cluster_one_shard(distributed, &ctx).unwrap());
        assert_eq!(
            types(&collapsed),
            vec!["SingletonNode", "EnumerateCollectionNode", "ReturnNode"]
        );
    }

    #[test]
    fn test_filter_and_sort_move_to_shards() {
        for (shards, expected) in [(3, SortMode::MinElement), (9, SortMode::Heap)] {
            let catalog = catalog(shards);
            let config = OptimizerConfig::cluster();
            let ctx = RuleContext {
                catalog: &catalog,
                config: &config,
            };
            let query = plan(
                "FOR d IN sharded FILTER d.value > 2 SORT d.value RETURN d",
                &catalog,
            );
            let query = modified(scatter_in_cluster(query, &ctx).unwrap());
            let query = modified(distribute_filtercalc_to_cluster(query, &ctx).unwrap());
            let query = modified(distribute_sort_to_cluster(query, &ctx).unwrap());
            assert_eq!(
                types(&query),
                vec![
                    "SingletonNode",
                    "ScatterNode",
                    "RemoteNode",
                    "EnumerateCollectionNode",
                    "CalculationNode",
                    "FilterNode",
                    "CalculationNode",
                    "SortNode",
                    "RemoteNode",
                    "GatherNode",
                    "ReturnNode",
                ]
            );
            let (elements, mode) = gather(&query);
            assert_eq!(elements.len(), 1);
            assert_eq!(mode, expected);
            query.validate().unwrap();
        }
    }

    #[test]
    fn test_trivial_scatter_removed() {
        let catalog = catalog(3);
        let config = OptimizerConfig::cluster();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let query = plan("LET x = 1 FOR d IN sharded RETURN d", &catalog);
        let query = modified(scatter_in_cluster(query, &ctx).unwrap());
        assert!(has_scatter(&query, &ctx));
        let query = modified(remove_unnecessary_remote_scatter(query, &ctx).unwrap());
        assert_eq!(
            types(&query),
            vec![
                "SingletonNode",
                "CalculationNode",
                "EnumerateCollectionNode",
                "RemoteNode",
                "GatherNode",
                "ReturnNode",
            ]
        );
    }

    #[test]
    fn test_decay_after_later_sort() {
        let catalog = catalog(3);
        let config = OptimizerConfig::cluster();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        let query = plan(
            "FOR a IN sharded SORT a.value FOR b IN single SORT b.name RETURN b",
            &catalog,
        );
        let query = modified(scatter_in_cluster(query, &ctx).unwrap());
        let query = modified(distribute_filtercalc_to_cluster(query, &ctx).unwrap());
        let query = modified(distribute_sort_to_cluster(query, &ctx).unwrap());
        assert!(has_sorted_gather(&query, &ctx));
        let query = modified(decay_unnecessary_sorted_gather(query, &ctx).unwrap());
        let (elements, mode) = gather(&query);
        assert!(elements.is_empty());
        assert_eq!(mode, SortMode::Unset);

        // a LIMIT in between needs the merged order
        let query = plan(
            "FOR a IN sharded SORT a.value LIMIT 2 FOR b IN single SORT b.name RETURN b",
            &catalog,
        );
        let query = modified(scatter_in_cluster(query, &ctx).unwrap());
        let query = modified(distribute_filtercalc_to_cluster(query, &ctx).unwrap());
        let query = modified(distribute_sort_to_cluster(query, &ctx).unwrap());
        assert!(matches!(
            decay_unnecessary_sorted_gather(query, &ctx).unwrap(),
            Rewrite::Unchanged(_)
        ));
    }
}
