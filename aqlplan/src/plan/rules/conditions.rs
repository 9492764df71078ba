// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rules that rewrite filter conditions into simpler forms
//!
//! Only conditions read by nothing but their filter are touched: a filter
//! looks at the truthiness of its condition, while `&&` and `||` yield one of
//! their operands, so the rewritten condition may differ in value but never
//! in truthiness.

use super::general::{is_filter, reader_count, rewrite};
use super::{Rewrite, RuleContext};
use crate::ast::BinaryOperator;
use crate::exec::value::{compare_values, values_equal};
use crate::plan::error::PlanResult;
use crate::plan::execution_plan::Plan;
use crate::plan::expression::Expr;
use crate::plan::node::{NodeId, NodeKind};
use serde_json::Value;
use std::cmp::Ordering;

/// Filters with the calculation of their condition
fn filter_conditions(plan: &Plan) -> Vec<(NodeId, NodeId, Expr)> {
    plan.find_nodes(is_filter, true)
        .into_iter()
        .filter_map(|filter| {
            let NodeKind::Filter { in_var } = plan.node(filter)?.kind else {
                return None;
            };
            if reader_count(plan, in_var) != 1 {
                return None;
            }
            let setter = plan.var_setter(in_var)?;
            match &plan.node(setter)?.kind {
                NodeKind::Calculation { expression, .. } => {
                    Some((filter, setter, expression.clone()))
                }
                _ => None,
            }
        })
        .collect()
}

/// Operands of a chain of `operator`, left to right
fn flatten(expression: &Expr, operator: BinaryOperator) -> Vec<&Expr> {
    match expression {
        Expr::Binary {
            operator: current,
            left,
            right,
        } if *current == operator => {
            let mut operands = flatten(left, operator);
            operands.extend(flatten(right, operator));
            operands
        }
        other => vec![other],
    }
}

fn is_operator(expression: &Expr, operator: BinaryOperator) -> bool {
    matches!(expression, Expr::Binary { operator: current, .. } if *current == operator)
}

fn splittable(condition: &Expr) -> bool {
    is_operator(condition, BinaryOperator::And)
        && condition.is_deterministic()
        && !condition.can_throw()
}

pub fn has_conjunctive_filter(plan: &Plan, _: &RuleContext) -> bool {
    filter_conditions(plan)
        .iter()
        .any(|(_, _, condition)| splittable(condition))
}

pub fn has_disjunctive_filter(plan: &Plan, _: &RuleContext) -> bool {
    filter_conditions(plan)
        .iter()
        .any(|(_, _, condition)| is_operator(condition, BinaryOperator::Or))
}

/// Replace `FILTER a && b` by `FILTER a FILTER b`, so each part can move
/// and be matched against indexes on its own
pub fn split_filters(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for (filter, setter, condition) in filter_conditions(&plan) {
        if !splittable(&condition) {
            continue;
        }
        // each new node lands directly below the old filter, so the first
        // conjunct ends up lowest
        for conjunct in flatten(&condition, BinaryOperator::And) {
            let out_var = plan.variables_mut().create_temporary();
            let calculation = plan.add_node(
                NodeKind::Calculation {
                    out_var,
                    expression: conjunct.clone(),
                },
                Vec::new(),
            )?;
            plan.insert_dependency(filter, calculation)?;
            let part = plan.add_node(NodeKind::Filter { in_var: out_var }, Vec::new())?;
            plan.insert_dependency(filter, part)?;
        }
        plan.unlink_node(filter)?;
        plan.unlink_node(setter)?;
        modified = true;
    }
    Ok(rewrite(plan, modified))
}

/// The attribute access of `x.a == const`, `const == x.a` or `x.a IN [..]`,
/// with the constant values it is compared against
fn equality_values(disjunct: &Expr) -> Option<(&Expr, Vec<Value>)> {
    let Expr::Binary {
        operator,
        left,
        right,
    } = disjunct
    else {
        return None;
    };
    match operator {
        BinaryOperator::Equal if left.attribute_path().is_some() => {
            Some((left.as_ref(), vec![right.evaluate_constant()?]))
        }
        BinaryOperator::Equal if right.attribute_path().is_some() => {
            Some((right.as_ref(), vec![left.evaluate_constant()?]))
        }
        BinaryOperator::In if left.attribute_path().is_some() => {
            match right.evaluate_constant()? {
                Value::Array(values) => Some((left.as_ref(), values)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// `x.a == 1 || x.a IN [2, 3] || 4 == x.a` as `x.a IN [1, 2, 3, 4]`
fn or_as_in(condition: &Expr) -> Option<Expr> {
    if !is_operator(condition, BinaryOperator::Or) {
        return None;
    }
    let mut access: Option<&Expr> = None;
    let mut values: Vec<Value> = Vec::new();
    for disjunct in flatten(condition, BinaryOperator::Or) {
        let (current, candidates) = equality_values(disjunct)?;
        match access {
            Some(existing) if existing != current => return None,
            _ => access = Some(current),
        }
        for value in candidates {
            if !values.iter().any(|known| values_equal(known, &value)) {
                values.push(value);
            }
        }
    }
    Some(Expr::binary(
        BinaryOperator::In,
        access?.clone(),
        Expr::Value(Value::Array(values)),
    ))
}

pub fn replace_or_with_in(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for (_, setter, condition) in filter_conditions(&plan) {
        let Some(replacement) = or_as_in(&condition) else {
            continue;
        };
        if let NodeKind::Calculation { expression, .. } = &mut plan.get_mut(setter)?.kind {
            *expression = replacement;
            modified = true;
        }
    }
    Ok(rewrite(plan, modified))
}

/// `(operator, access, value)` of a comparison against a constant, turned
/// around so the access is on the left
fn bound(disjunct: &Expr) -> Option<(BinaryOperator, &Expr, Value)> {
    let Expr::Binary {
        operator,
        left,
        right,
    } = disjunct
    else {
        return None;
    };
    let (operator, access, value) = if left.attribute_path().is_some() {
        (*operator, left.as_ref(), right.evaluate_constant()?)
    } else if right.attribute_path().is_some() {
        (operator.reversed()?, right.as_ref(), left.evaluate_constant()?)
    } else {
        return None;
    };
    match operator {
        BinaryOperator::LessThan
        | BinaryOperator::LessEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterEqual => Some((operator, access, value)),
        _ => None,
    }
}

fn is_upper(operator: BinaryOperator) -> bool {
    matches!(
        operator,
        BinaryOperator::LessThan | BinaryOperator::LessEqual
    )
}

/// `x.a < 3 || x.a <= 5` as `x.a <= 5`: of bounds in one direction on one
/// attribute, only the widest matters
fn widest_bound(condition: &Expr) -> Option<Expr> {
    if !is_operator(condition, BinaryOperator::Or) {
        return None;
    }
    let mut widest: Option<(BinaryOperator, &Expr, Value)> = None;
    for disjunct in flatten(condition, BinaryOperator::Or) {
        let (operator, access, value) = bound(disjunct)?;
        let Some((current_operator, current_access, current_value)) = widest.take() else {
            widest = Some((operator, access, value));
            continue;
        };
        if current_access != access || is_upper(current_operator) != is_upper(operator) {
            return None;
        }
        let ordering = compare_values(&value, &current_value);
        let wider = match ordering {
            Ordering::Equal => matches!(
                operator,
                BinaryOperator::LessEqual | BinaryOperator::GreaterEqual
            ),
            Ordering::Greater => is_upper(operator),
            Ordering::Less => !is_upper(operator),
        };
        widest = if wider {
            Some((operator, access, value))
        } else {
            Some((current_operator, current_access, current_value))
        };
    }
    let (operator, access, value) = widest?;
    Some(Expr::binary(operator, access.clone(), Expr::Value(value)))
}

pub fn remove_redundant_or(mut plan: Plan, _: &RuleContext) -> PlanResult<Rewrite> {
    let mut modified = false;
    for (_, setter, condition) in filter_conditions(&plan) {
        let Some(replacement) = widest_bound(&condition) else {
            continue;
        };
        if let NodeKind::Calculation { expression, .. } = &mut plan.get_mut(setter)?.kind {
            *expression = replacement;
            modified = true;
        }
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
    use crate::plan::expression::VarId;
    use serde_json::json;

    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog
            .create_collection(CollectionDefinition::new("docs"))
            .unwrap();
        catalog
    }

    fn plan(query: &str, catalog: &MemoryCatalog) -> Plan {
        build_plan(&parse_query(query).unwrap(), catalog, false).unwrap()
    }

    fn filter_texts(plan: &Plan) -> Vec<String> {
        filter_conditions(plan)
            .into_iter()
            .map(|(_, _, condition)| condition.render(plan.variables()))
            .collect()
    }

    fn run<F>(rule: F, query: &str) -> Rewrite
    where
        F: Fn(Plan, &RuleContext) -> PlanResult<Rewrite>,
    {
        let catalog = catalog();
        let config = OptimizerConfig::default();
        let ctx = RuleContext {
            catalog: &catalog,
            config: &config,
        };
        rule(plan(query, &catalog), &ctx).unwrap()
    }

    fn modified(rewrite: Rewrite) -> Plan {
        match rewrite {
            Rewrite::Modified(plan) => plan,
            other => panic!("expected a modified plan, got {:?}", other),
        }
    }

    #[test]
    fn test_split_filters() {
        let split = modified(run(
            split_filters,
            "FOR d IN docs FILTER d.a == 1 && d.b > 2 && d.c RETURN d",
        ));
        assert_eq!(
            filter_texts(&split),
            vec!["(d.a == 1)", "(d.b > 2)", "d.c"]
        );
        split.validate().unwrap();

        // a throwing conjunct keeps the short circuit
        let unchanged = run(
            split_filters,
            "FOR d IN docs FILTER d.a == 1 && LENGTH(d.b) > 2 RETURN d",
        );
        assert!(matches!(unchanged, Rewrite::Unchanged(_)));
    }

    #[test]
    fn test_or_with_equalities_becomes_in() {
        let rewritten = modified(run(
            replace_or_with_in,
            "FOR d IN docs FILTER d.a == 1 || 2 == d.a || d.a IN [3, 1] RETURN d",
        ));
        assert_eq!(filter_texts(&rewritten), vec!["(d.a IN [1,2,3])"]);

        // different attributes stay an OR
        let unchanged = run(
            replace_or_with_in,
            "FOR d IN docs FILTER d.a == 1 || d.b == 2 RETURN d",
        );
        assert!(matches!(unchanged, Rewrite::Unchanged(_)));
    }

    #[test]
    fn test_condition_read_elsewhere_is_kept() {
        let unchanged = run(
            replace_or_with_in,
            "FOR d IN docs LET c = d.a == 1 || d.a == 2 FILTER c RETURN c",
        );
        assert!(matches!(unchanged, Rewrite::Unchanged(_)));
    }

    #[test]
    fn test_widest_bound() {
        let rewritten = modified(run(
            remove_redundant_or,
            "FOR d IN docs FILTER d.a < 3 || d.a <= 5 || 4 > d.a RETURN d",
        ));
        assert_eq!(filter_texts(&rewritten), vec!["(d.a <= 5)"]);

        let rewritten = modified(run(
            remove_redundant_or,
            "FOR d IN docs FILTER d.a >= 2 || d.a > 2 RETURN d",
        ));
        assert_eq!(filter_texts(&rewritten), vec!["(d.a >= 2)"]);

        // opposite directions describe two ranges
        let unchanged = run(
            remove_redundant_or,
            "FOR d IN docs FILTER d.a < 3 || d.a > 5 RETURN d",
        );
        assert!(matches!(unchanged, Rewrite::Unchanged(_)));
    }

    #[test]
    fn test_in_needs_constant_array() {
        let condition = Expr::binary(
            BinaryOperator::Or,
            Expr::binary(
                BinaryOperator::In,
                Expr::Reference(VarId(0)),
                Expr::Value(json!("text")),
            ),
            Expr::binary(
                BinaryOperator::Equal,
                Expr::Reference(VarId(0)),
                Expr::Value(json!(1)),
            ),
        );
        assert_eq!(or_as_in(&condition), None);
    }
}
