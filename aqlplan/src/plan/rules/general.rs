// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rules that rearrange calculations, filters, sorts and loops without
//! looking at indexes or shards

use super::{Rewrite, RuleContext};
use crate::exec::value::is_truthy;
use crate::plan::error::PlanResult;
use crate::plan::execution_plan::Plan;
use crate::plan::expression::{Expr, VarId};
use crate::plan::node::{NodeId, NodeKind, PlanNode};
use std::collections::BTreeSet;

pub(super) fn rewrite(plan: Plan, modified: bool) -> Rewrite {
    if modified {
        Rewrite::Modified(plan)
    } else {
        Rewrite::Unchanged(plan)
    }
}

pub(super) fn is_calculation(node: &PlanNode) -> bool {
    matches!(node.kind, NodeKind::Calculation { .. })
}

pub(super) fn is_filter(node: &PlanNode) -> bool {
    matches!(node.kind, NodeKind::Filter { .. })
}

pub(super) fn is_sort(node: &PlanNode) -> bool {
    matches!(node.kind, NodeKind::Sort { .. })
}

/// Number of nodes reading `var`, nested chains included
pub(super) fn reader_count(plan: &Plan, var: VarId) -> usize {
    plan.nodes()
        .filter(|node| node.kind.variables_used().contains(&var))
        .count()
}

pub fn has_calculation(plan: &Plan, _: &RuleContext) -> bool {
    plan.nodes().any(is_calculation)
}

pub fn has_filter(plan: &Plan, _: &RuleContext) -> bool {
    plan.nodes().any(is_filter)
}

pub fn has_sort(plan: &Plan, _: &RuleContext) -> bool {
    plan.nodes().any(is_sort)
}

/// Filters whose condition is a constant, with the constant's truthiness
fn constant_filters(plan: &Plan) -> Vec<(NodeId, bool)> {
    plan.find_nodes(is_filter, true)
        .into_iter()
        .filter_map(|id| {
            let NodeKind::Filter { in_var } = plan.node(id)?.kind else {
                return None;
            };
            let value = plan.calculation_of(in_var)?.evaluate_constant()?;
            Some((id, is_truthy(&value)))
        })
        .collect()
}

pub fn has_constant_filter(plan: &Plan, _: &RuleContext) -> bool {
    !constant_filters(plan).is_empty()
}

/// Drop filters that always pass; filters that never pass become NoResults
pub fn remove_unnecessary_filters(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let filters = constant_filters(&plan);
    for (id, passes) in &filters {
        if *passes {
            plan.unlink_node(*id)?;
        } else {
            plan.replace_node(*id, NodeKind::NoResults)?;
        }
    }
    Ok(rewrite(plan, !filters.is_empty()))
}

/// Lowest node `id` can be moved below while only passing nodes accepted by
/// `can_pass`
fn lowest_position<F>(plan: &Plan, id: NodeId, can_pass: F) -> PlanResult<Option<NodeId>>
where
    F: Fn(&NodeKind) -> bool,
{
    let mut target = None;
    let mut below = plan.get(id)?.dependency();
    while let Some(dependency) = below {
        let node = plan.get(dependency)?;
        if matches!(
            node.kind,
            NodeKind::Singleton | NodeKind::Collect(_) | NodeKind::NoResults
        ) || !can_pass(&node.kind)
        {
            break;
        }
        target = Some(dependency);
        below = node.dependency();
    }
    Ok(target)
}

fn sets_any(kind: &NodeKind, vars: &BTreeSet<VarId>) -> bool {
    kind.variables_set_here().iter().any(|var| vars.contains(var))
}

/// Move deterministic calculations towards the Singleton, out of loops they
/// do not depend on
pub fn move_calculations_up(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for id in plan.find_nodes(is_calculation, true) {
        let deterministic = matches!(
            &plan.get(id)?.kind,
            NodeKind::Calculation { expression, .. } if expression.is_deterministic()
        );
        if !deterministic {
            continue;
        }
        let used = plan.variables_used_by(id);
        if let Some(target) = lowest_position(&plan, id, |kind| !sets_any(kind, &used))? {
            plan.move_below(id, target)?;
            modified = true;
        }
    }
    Ok(rewrite(plan, modified))
}

/// Move filters down to the calculation of their condition. Filters never
/// pass a LIMIT.
pub fn move_filters_up(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for id in plan.find_nodes(is_filter, true) {
        let used = plan.variables_used_by(id);
        let target = lowest_position(&plan, id, |kind| {
            !matches!(kind, NodeKind::Limit { .. }) && !sets_any(kind, &used)
        })?;
        if let Some(target) = target {
            plan.move_below(id, target)?;
            modified = true;
        }
    }
    Ok(rewrite(plan, modified))
}

/// Remove duplicate and constant sort criteria, and sorts whose order is
/// replaced by a later sort of the same stream
pub fn remove_redundant_sorts(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for id in plan.find_nodes(is_sort, true) {
        let NodeKind::Sort { elements } = &plan.get(id)?.kind else {
            continue;
        };
        let mut seen: Vec<(Expr, &[String])> = Vec::new();
        let kept: Vec<_> = elements
            .iter()
            .filter(|element| {
                let expression = plan
                    .calculation_of(element.var)
                    .cloned()
                    .unwrap_or(Expr::Reference(element.var));
                if expression.is_constant() {
                    return false;
                }
                // a repeated criterion never changes the order
                let key = (expression, element.path.as_slice());
                if seen.contains(&key) {
                    return false;
                }
                seen.push(key);
                true
            })
            .cloned()
            .collect();

        if kept.is_empty() {
            plan.unlink_node(id)?;
            modified = true;
            continue;
        }
        if kept.len() != elements.len() {
            plan.replace_node(id, NodeKind::Sort { elements: kept })?;
            modified = true;
        }

        let mut current = plan.parent_of(id);
        while let Some(parent) = current {
            match &plan.get(parent)?.kind {
                NodeKind::Sort { .. } => {
                    plan.unlink_node(id)?;
                    modified = true;
                    break;
                }
                NodeKind::Limit { .. }
                | NodeKind::Collect(_)
                | NodeKind::Return { .. }
                | NodeKind::Subquery { .. }
                | NodeKind::NoResults => break,
                kind if kind.is_enumeration() => break,
                _ => current = plan.parent_of(parent),
            }
        }
    }
    Ok(rewrite(plan, modified))
}

/// Remove calculations whose result nobody reads
pub fn remove_unnecessary_calculations(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    loop {
        let unused: Vec<NodeId> = plan
            .find_nodes(is_calculation, true)
            .into_iter()
            .filter(|id| match plan.node(*id).map(|node| &node.kind) {
                Some(NodeKind::Calculation { out_var, .. }) => !plan.is_variable_used(*out_var),
                _ => false,
            })
            .collect();
        if unused.is_empty() {
            break;
        }
        for id in unused {
            plan.unlink_node(id)?;
        }
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

/// Output variable of an identical calculation below `id` in the same
/// chain; a COLLECT in between hides it
fn identical_calculation_below(
    plan: &Plan,
    id: NodeId,
    expression: &Expr,
) -> PlanResult<Option<VarId>> {
    let mut below = plan.get(id)?.dependency();
    while let Some(dependency) = below {
        let node = plan.get(dependency)?;
        match &node.kind {
            NodeKind::Calculation {
                out_var,
                expression: other,
            } if other == expression => return Ok(Some(*out_var)),
            NodeKind::Collect(_) => break,
            _ => below = node.dependency(),
        }
    }
    Ok(None)
}

/// Reuse the result of an identical deterministic calculation computed
/// further down
pub fn remove_redundant_calculations(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for id in plan.find_nodes(is_calculation, true) {
        let Some(NodeKind::Calculation {
            out_var,
            expression,
        }) = plan.node(id).map(|node| node.kind.clone())
        else {
            continue;
        };
        if !expression.is_deterministic() {
            continue;
        }
        let Some(existing) = identical_calculation_below(&plan, id, &expression)? else {
            continue;
        };
        log::trace!("Calculation {} repeats the one setting {}", id, existing);
        let readers: Vec<NodeId> = plan.nodes().map(|node| node.id).collect();
        for reader in readers {
            plan.get_mut(reader)?.kind.replace_variable(out_var, existing);
        }
        plan.unlink_node(id)?;
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

/// Variable of a sort by nothing but `RAND()`
fn random_sort_var(plan: &Plan, sort: NodeId) -> Option<VarId> {
    let NodeKind::Sort { elements } = &plan.node(sort)?.kind else {
        return None;
    };
    let [element] = elements.as_slice() else {
        return None;
    };
    if !element.path.is_empty() {
        return None;
    }
    match plan.calculation_of(element.var)? {
        Expr::Function { name, arguments } if name == "RAND" && arguments.is_empty() => {
            Some(element.var)
        }
        _ => None,
    }
}

pub fn has_random_sort(plan: &Plan, _: &RuleContext) -> bool {
    plan.find_nodes(is_sort, true)
        .into_iter()
        .any(|sort| random_sort_var(plan, sort).is_some())
}

/// The only collection scan below a random sort, when nothing but
/// calculations that cannot fail sit between them
fn random_sort_source(plan: &Plan, sort: NodeId, rand_var: VarId) -> PlanResult<Option<NodeId>> {
    let mut source = None;
    let mut below = plan.get(sort)?.dependency();
    while let Some(dependency) = below {
        let node = plan.get(dependency)?;
        match &node.kind {
            NodeKind::Singleton => break,
            NodeKind::EnumerateCollection { .. } if source.is_none() => source = Some(dependency),
            NodeKind::Calculation {
                out_var,
                expression,
            } if *out_var == rand_var || !expression.can_throw() => {}
            _ => return Ok(None),
        }
        below = node.dependency();
    }
    Ok(source)
}

/// `FOR x IN c SORT RAND()` becomes a scan that returns documents in random
/// order
pub fn remove_sort_rand(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for sort in plan.find_nodes(is_sort, true) {
        let Some(rand_var) = random_sort_var(&plan, sort) else {
            continue;
        };
        let Some(source) = random_sort_source(&plan, sort, rand_var)? else {
            continue;
        };
        if let NodeKind::EnumerateCollection { random, .. } = &mut plan.get_mut(source)?.kind {
            *random = true;
        }
        plan.unlink_node(sort)?;
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

/// Calculation setting `var` that can be inlined into its only reader `id`:
/// same chain, no loop or COLLECT in between, and safe to evaluate for
/// fewer rows
fn fusable_setter(plan: &Plan, id: NodeId, var: VarId) -> PlanResult<Option<NodeId>> {
    if reader_count(plan, var) != 1 {
        return Ok(None);
    }
    let mut below = plan.get(id)?.dependency();
    while let Some(dependency) = below {
        let node = plan.get(dependency)?;
        match &node.kind {
            NodeKind::Calculation {
                out_var,
                expression,
            } if *out_var == var => {
                let safe = expression.is_deterministic() && !expression.can_throw();
                return Ok(safe.then_some(dependency));
            }
            NodeKind::Calculation { .. }
            | NodeKind::Filter { .. }
            | NodeKind::Sort { .. }
            | NodeKind::Limit { .. } => below = node.dependency(),
            _ => break,
        }
    }
    Ok(None)
}

/// Inline calculations into the single calculation that reads them
pub fn fuse_calculations(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for id in plan.find_nodes(is_calculation, true) {
        // inlined expressions can bring further candidates along
        loop {
            let used = match plan.node(id).map(|node| &node.kind) {
                Some(NodeKind::Calculation { expression, .. }) => expression.variables_used(),
                _ => break,
            };
            let mut fused = false;
            for var in used {
                let Some(setter) = fusable_setter(&plan, id, var)? else {
                    continue;
                };
                let NodeKind::Calculation { expression: inner, .. } = plan.unlink_node(setter)?.kind
                else {
                    continue;
                };
                if let NodeKind::Calculation { expression, .. } = &mut plan.get_mut(id)?.kind {
                    expression.substitute(var, &inner);
                }
                fused = true;
            }
            if !fused {
                break;
            }
            modified = true;
        }
    }
    Ok(rewrite(plan, modified))
}

/// Maximal runs of adjacent collection or list enumerations on the main
/// chain, in execution order
fn enumeration_runs(plan: &Plan) -> Vec<Vec<NodeId>> {
    let mut runs = Vec::new();
    let mut run = Vec::new();
    for id in plan.main_chain() {
        let enumerates = matches!(
            plan.node(id).map(|node| &node.kind),
            Some(NodeKind::EnumerateCollection { .. } | NodeKind::EnumerateList { .. })
        );
        if enumerates {
            run.push(id);
        } else {
            if run.len() > 1 {
                runs.push(std::mem::take(&mut run));
            }
            run.clear();
        }
    }
    if run.len() > 1 {
        runs.push(run);
    }
    runs
}

pub fn has_adjacent_enumerations(plan: &Plan, _: &RuleContext) -> bool {
    !enumeration_runs(plan).is_empty()
}

/// Orders of `run` in which every node comes after the nodes setting the
/// variables it reads; the original order first
fn valid_orders(plan: &Plan, run: &[NodeId], cap: usize) -> Vec<Vec<NodeId>> {
    fn extend(
        plan: &Plan,
        prefix: &mut Vec<NodeId>,
        remaining: &mut Vec<NodeId>,
        orders: &mut Vec<Vec<NodeId>>,
        cap: usize,
    ) {
        if orders.len() >= cap {
            return;
        }
        if remaining.is_empty() {
            orders.push(prefix.clone());
            return;
        }
        for position in 0..remaining.len() {
            let candidate = remaining[position];
            let used = plan.variables_used_by(candidate);
            let blocked = remaining.iter().any(|other| {
                *other != candidate
                    && plan
                        .node(*other)
                        .map(|node| sets_any(&node.kind, &used))
                        .unwrap_or(false)
            });
            if blocked {
                continue;
            }
            remaining.remove(position);
            prefix.push(candidate);
            extend(plan, prefix, remaining, orders, cap);
            prefix.pop();
            remaining.insert(position, candidate);
        }
    }

    let mut orders = Vec::new();
    extend(plan, &mut Vec::new(), &mut run.to_vec(), &mut orders, cap);
    orders
}

fn reorder(plan: &mut Plan, run: &[NodeId], order: &[NodeId]) -> PlanResult<()> {
    let (Some(first), Some(last)) = (run.first(), run.last()) else {
        return Ok(());
    };
    let mut below = plan.get(*first)?.dependency();
    let parent = plan.parent_of(*last);
    for id in order {
        plan.get_mut(*id)?.dependencies = below.into_iter().collect();
        below = Some(*id);
    }
    if let (Some(parent), Some(top)) = (parent, below) {
        plan.replace_dependency(parent, *last, top)?;
    }
    Ok(())
}

/// Offer every valid order of adjacent loops as an alternative plan
pub fn interchange_adjacent_enumerations(plan: Plan, ctx: &RuleContext) -> PlanResult<Rewrite> {
    let cap = ctx.config.max_number_of_plans.max(1);
    let runs = enumeration_runs(&plan);
    let orders: Vec<Vec<Vec<NodeId>>> = runs
        .iter()
        .map(|run| valid_orders(&plan, run, cap))
        .collect();

    let mut combinations: Vec<Vec<usize>> = vec![Vec::new()];
    for options in &orders {
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                (0..options.len()).map(move |choice| {
                    let mut combination = prefix.clone();
                    combination.push(choice);
                    combination
                })
            })
            .take(cap)
            .collect();
    }
    if combinations.len() <= 1 {
        return Ok(Rewrite::Unchanged(plan));
    }

    let mut alternatives = Vec::with_capacity(combinations.len());
    for combination in &combinations {
        if combination.iter().all(|choice| *choice == 0) {
            alternatives.push((plan.clone(), false));
            continue;
        }
        let mut alternative = plan.clone();
        for ((run, options), choice) in runs.iter().zip(&orders).zip(combination) {
            reorder(&mut alternative, run, &options[*choice])?;
        }
        alternatives.push((alternative, true));
    }
    log::debug!(
        "Loop reordering produced {} alternatives",
        alternatives.len()
    );
    Ok(Rewrite::Alternatives(alternatives))
}
