// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Translation of a parsed query into an unoptimized execution plan
//!
//! Operations map one to one onto plan nodes. Expressions that are not plain
//! variable references are materialized by Calculation nodes into temporary
//! variables; subqueries become nested chains referenced by Subquery nodes.

use crate::ast::{Expression, Literal, Operation, Query, TraversalClause};
use crate::catalog::Catalog;
use crate::exec::functions::is_known_function;
use crate::exec::value::number;
use crate::plan::error::{PlanError, PlanResult};
use crate::plan::execution_plan::Plan;
use crate::plan::expression::{Expr, VarId};
use crate::plan::node::{
    AggregateFunction, CollectAggregate, CollectGroup, CollectInto, CollectSpec, NodeId, NodeKind,
    SortElement, TraversalSpec,
};
use serde_json::Value;
use std::collections::BTreeMap;

type Scope = BTreeMap<String, VarId>;

/// Build the unoptimized plan of `query`. With `full_count`, the last LIMIT
/// of the main query also counts the rows it discards.
pub fn build_plan(query: &Query, catalog: &dyn Catalog, full_count: bool) -> PlanResult<Plan> {
    let mut builder = PlanBuilder {
        plan: Plan::new(),
        catalog,
        main_limits: Vec::new(),
    };
    let root = builder.build_chain(query, &Scope::new(), true)?;
    builder.plan.set_root(root)?;

    if full_count {
        if let Some(last) = builder.main_limits.last().copied() {
            if let NodeKind::Limit { full_count, .. } = &mut builder.plan.get_mut(last)?.kind {
                *full_count = true;
            }
        }
    }

    builder.plan.validate()?;
    log::debug!(
        "Built plan with {} nodes over {:?}",
        builder.plan.node_count(),
        builder.plan.collections()
    );
    Ok(builder.plan)
}

struct PlanBuilder<'a> {
    plan: Plan,
    catalog: &'a dyn Catalog,
    main_limits: Vec<NodeId>,
}

impl<'a> PlanBuilder<'a> {
    /// Build one chain and return its Return node
    fn build_chain(&mut self, query: &Query, outer: &Scope, main: bool) -> PlanResult<NodeId> {
        let mut current = if main {
            self.plan.root()
        } else {
            self.plan.add_node(NodeKind::Singleton, vec![])?
        };
        let mut scope = outer.clone();

        for operation in &query.operations {
            match operation {
                Operation::For { variable, source } => {
                    current = self.build_for(variable, source, &mut scope, current)?;
                }
                Operation::Traversal(clause) => {
                    current = self.build_traversal(clause, &mut scope, current)?;
                }
                Operation::Filter(condition) => {
                    let in_var = self.materialize(condition, &scope, &mut current)?;
                    current = self.plan.add_node(NodeKind::Filter { in_var }, vec![current])?;
                }
                Operation::Let { variable, value } => {
                    let out_var = self.plan.variables_mut().create(variable);
                    if let Expression::Subquery(subquery) = value {
                        let body = self.build_chain(subquery, &scope, false)?;
                        current = self
                            .plan
                            .add_node(NodeKind::Subquery { body, out_var }, vec![current])?;
                    } else {
                        let expression = self.expression(value, &scope, &mut current)?;
                        current = self.plan.add_node(
                            NodeKind::Calculation {
                                out_var,
                                expression,
                            },
                            vec![current],
                        )?;
                    }
                    scope.insert(variable.clone(), out_var);
                }
                Operation::Sort(items) => {
                    let mut elements = Vec::with_capacity(items.len());
                    for item in items {
                        let var = self.materialize(&item.expression, &scope, &mut current)?;
                        elements.push(SortElement::new(var, item.ascending));
                    }
                    current = self.plan.add_node(NodeKind::Sort { elements }, vec![current])?;
                }
                Operation::Limit { offset, count } => {
                    current = self.plan.add_node(
                        NodeKind::Limit {
                            offset: *offset,
                            limit: *count,
                            full_count: false,
                        },
                        vec![current],
                    )?;
                    if main {
                        self.main_limits.push(current);
                    }
                }
                Operation::Collect(clause) => {
                    let mut spec = CollectSpec::default();
                    let mut outputs = Vec::new();
                    for (name, expression) in &clause.groups {
                        let in_var = self.materialize(expression, &scope, &mut current)?;
                        let out_var = self.plan.variables_mut().create(name);
                        spec.groups.push(CollectGroup { out_var, in_var });
                        outputs.push((name.clone(), out_var));
                    }
                    for aggregate in &clause.aggregates {
                        let function = AggregateFunction::from_name(&aggregate.function)
                            .ok_or_else(|| {
                                PlanError::InvalidQuery(format!(
                                    "unknown aggregate function {}()",
                                    aggregate.function
                                ))
                            })?;
                        let in_var = self.materialize(&aggregate.argument, &scope, &mut current)?;
                        let out_var = self.plan.variables_mut().create(&aggregate.variable);
                        spec.aggregates.push(CollectAggregate {
                            out_var,
                            function,
                            in_var,
                        });
                        outputs.push((aggregate.variable.clone(), out_var));
                    }
                    if let Some(into) = &clause.into {
                        let kept = scope
                            .iter()
                            .filter(|(name, var)| outer.get(*name) != Some(*var))
                            .map(|(name, var)| (name.clone(), *var))
                            .collect();
                        let out_var = self.plan.variables_mut().create(into);
                        spec.into = Some(CollectInto { out_var, kept });
                        outputs.push((into.clone(), out_var));
                    }
                    if let Some(count_into) = &clause.count_into {
                        let out_var = self.plan.variables_mut().create(count_into);
                        spec.count_into = Some(out_var);
                        outputs.push((count_into.clone(), out_var));
                    }
                    current = self.plan.add_node(NodeKind::Collect(spec), vec![current])?;

                    // COLLECT hides the variables of its own chain
                    scope = outer.clone();
                    scope.extend(outputs);
                }
            }
        }

        let mut in_var = self.materialize(&query.return_clause.expression, &scope, &mut current)?;
        if query.return_clause.distinct {
            let out_var = self.plan.variables_mut().create_temporary();
            current = self.plan.add_node(
                NodeKind::Collect(CollectSpec {
                    groups: vec![CollectGroup { out_var, in_var }],
                    ..CollectSpec::default()
                }),
                vec![current],
            )?;
            in_var = out_var;
        }
        self.plan.add_node(NodeKind::Return { in_var }, vec![current])
    }

    fn build_for(
        &mut self,
        variable: &str,
        source: &Expression,
        scope: &mut Scope,
        mut current: NodeId,
    ) -> PlanResult<NodeId> {
        let out_var = self.plan.variables_mut().create(variable);
        let kind = match source {
            Expression::Identifier(name) if !scope.contains_key(name) => {
                self.require_collection(name)?;
                NodeKind::EnumerateCollection {
                    collection: name.clone(),
                    out_var,
                    random: false,
                }
            }
            _ => {
                let in_var = self.materialize(source, scope, &mut current)?;
                NodeKind::EnumerateList { in_var, out_var }
            }
        };
        scope.insert(variable.to_string(), out_var);
        self.plan.add_node(kind, vec![current])
    }

    fn build_traversal(
        &mut self,
        clause: &TraversalClause,
        scope: &mut Scope,
        mut current: NodeId,
    ) -> PlanResult<NodeId> {
        self.require_collection(&clause.edge_collection)?;
        let start_var = self.materialize(&clause.start, scope, &mut current)?;
        let vertex_var = self.plan.variables_mut().create(&clause.vertex_variable);
        let edge_var = clause
            .edge_variable
            .as_ref()
            .map(|name| self.plan.variables_mut().create(name));
        let path_var = clause
            .path_variable
            .as_ref()
            .map(|name| self.plan.variables_mut().create(name));

        scope.insert(clause.vertex_variable.clone(), vertex_var);
        if let (Some(name), Some(var)) = (&clause.edge_variable, edge_var) {
            scope.insert(name.clone(), var);
        }
        if let (Some(name), Some(var)) = (&clause.path_variable, path_var) {
            scope.insert(name.clone(), var);
        }

        self.plan.add_node(
            NodeKind::Traversal(TraversalSpec {
                start_var,
                vertex_var,
                edge_var,
                path_var,
                min_depth: clause.min_depth,
                max_depth: clause.max_depth,
                direction: clause.direction,
                edge_collection: clause.edge_collection.clone(),
            }),
            vec![current],
        )
    }

    fn require_collection(&self, name: &str) -> PlanResult<()> {
        if self.catalog.has_collection(name) {
            Ok(())
        } else {
            Err(PlanError::UnknownCollection(name.to_string()))
        }
    }

    /// Variable holding the value of `expression`: the variable itself for a
    /// plain reference, a new Calculation otherwise
    fn materialize(
        &mut self,
        expression: &Expression,
        scope: &Scope,
        current: &mut NodeId,
    ) -> PlanResult<VarId> {
        let expression = self.expression(expression, scope, current)?;
        if let Expr::Reference(var) = expression {
            return Ok(var);
        }
        let out_var = self.plan.variables_mut().create_temporary();
        *current = self.plan.add_node(
            NodeKind::Calculation {
                out_var,
                expression,
            },
            vec![*current],
        )?;
        Ok(out_var)
    }

    /// Convert an expression; subqueries inside it are added below `current`
    fn expression(
        &mut self,
        expression: &Expression,
        scope: &Scope,
        current: &mut NodeId,
    ) -> PlanResult<Expr> {
        Ok(match expression {
            Expression::Literal(literal) => Expr::Value(literal_value(literal)),
            Expression::Identifier(name) => scope
                .get(name)
                .map(|var| Expr::Reference(*var))
                .ok_or_else(|| PlanError::UnknownVariable(name.clone()))?,
            Expression::AttributeAccess { base, attribute } => {
                Expr::attribute(self.expression(base, scope, current)?, attribute)
            }
            Expression::IndexAccess { base, index } => Expr::Index {
                base: Box::new(self.expression(base, scope, current)?),
                index: Box::new(self.expression(index, scope, current)?),
            },
            Expression::Array(items) => Expr::Array(
                items
                    .iter()
                    .map(|item| self.expression(item, scope, current))
                    .collect::<PlanResult<Vec<_>>>()?,
            ),
            Expression::Object(entries) => {
                let mut converted = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    converted.push((key.clone(), self.expression(value, scope, current)?));
                }
                Expr::Object(converted)
            }
            Expression::Range { low, high } => Expr::Range {
                low: Box::new(self.expression(low, scope, current)?),
                high: Box::new(self.expression(high, scope, current)?),
            },
            Expression::Unary { operator, operand } => Expr::Unary {
                operator: *operator,
                operand: Box::new(self.expression(operand, scope, current)?),
            },
            Expression::Binary {
                operator,
                left,
                right,
            } => Expr::binary(
                *operator,
                self.expression(left, scope, current)?,
                self.expression(right, scope, current)?,
            ),
            Expression::FunctionCall { name, arguments } => {
                let name = name.to_ascii_uppercase();
                if !is_known_function(&name) {
                    return Err(PlanError::InvalidQuery(format!(
                        "unknown function {}()",
                        name
                    )));
                }
                let mut converted = Vec::with_capacity(arguments.len());
                for (position, argument) in arguments.iter().enumerate() {
                    if name == "FULLTEXT" && position == 0 {
                        converted.push(self.collection_argument(argument, scope)?);
                    } else {
                        converted.push(self.expression(argument, scope, current)?);
                    }
                }
                Expr::Function {
                    name,
                    arguments: converted,
                }
            }
            Expression::Subquery(subquery) => {
                let body = self.build_chain(subquery, scope, false)?;
                let out_var = self.plan.variables_mut().create_temporary();
                *current = self
                    .plan
                    .add_node(NodeKind::Subquery { body, out_var }, vec![*current])?;
                Expr::Reference(out_var)
            }
        })
    }

    fn collection_argument(&self, argument: &Expression, scope: &Scope) -> PlanResult<Expr> {
        let name = match argument {
            Expression::Identifier(name) if !scope.contains_key(name) => name,
            Expression::Literal(Literal::String(name)) => name,
            _ => {
                return Err(PlanError::InvalidQuery(
                    "FULLTEXT() expects a collection as first argument".to_string(),
                ))
            }
        };
        self.require_collection(name)?;
        Ok(Expr::Collection(name.clone()))
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Integer(i) => Value::from(*i),
        Literal::Float(f) => number(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}
