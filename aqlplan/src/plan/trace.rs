// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Optimizer tracing
//!
//! Records every rule application of an optimizer run, with the plan cost
//! before and after, for debugging and for the text explain format.

use crate::plan::execution_plan::Plan;
use crate::plan::node::{NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One rule application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    pub rule: String,
    pub pass: u32,
    pub modified: bool,
    /// Number of sibling plans the rule produced, 0 for in-place rules
    pub alternatives: usize,
    pub cost_before: f64,
    pub cost_after: f64,
    pub duration: Duration,
}

/// All rule applications of one optimizer run, in application order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerTrace {
    pub steps: Vec<TraceStep>,
    pub total_duration: Duration,
}

/// Builder for an [`OptimizerTrace`]
pub struct PlanTracer {
    steps: Vec<TraceStep>,
    start_time: Instant,
    current_step_start: Option<Instant>,
}

impl Default for PlanTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanTracer {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            start_time: Instant::now(),
            current_step_start: None,
        }
    }

    pub fn start_step(&mut self) {
        self.current_step_start = Some(Instant::now());
    }

    /// End the current step and record it
    pub fn end_step(
        &mut self,
        rule: &str,
        pass: u32,
        modified: bool,
        alternatives: usize,
        cost_before: f64,
        cost_after: f64,
    ) {
        let duration = self
            .current_step_start
            .take()
            .map(|start| start.elapsed())
            .unwrap_or_default();
        self.steps.push(TraceStep {
            rule: rule.to_string(),
            pass,
            modified,
            alternatives,
            cost_before,
            cost_after,
            duration,
        });
    }

    pub fn finalize(self) -> OptimizerTrace {
        OptimizerTrace {
            steps: self.steps,
            total_duration: self.start_time.elapsed(),
        }
    }
}

impl OptimizerTrace {
    /// Steps that changed a plan
    pub fn applied(&self) -> impl Iterator<Item = &TraceStep> {
        self.steps
            .iter()
            .filter(|step| step.modified || step.alternatives > 0)
    }

    pub fn format_steps(&self) -> String {
        let mut output = String::new();
        output.push_str("Optimizer Steps\n");
        output.push_str(&"-".repeat(30));
        output.push('\n');
        for (i, step) in self.applied().enumerate() {
            let outcome = if step.alternatives > 0 {
                format!("{} alternatives", step.alternatives)
            } else {
                format!("cost {:.2} -> {:.2}", step.cost_before, step.cost_after)
            };
            output.push_str(&format!(
                "{}. {} [{}] {} ({:.3}ms)\n",
                i + 1,
                step.rule,
                step.pass,
                outcome,
                step.duration.as_secs_f64() * 1000.0
            ));
        }
        output.push_str(&format!(
            "Total: {:.3}ms\n",
            self.total_duration.as_secs_f64() * 1000.0
        ));
        output
    }
}

/// Render a plan as an indented tree, root first, subquery bodies nested
/// below their Subquery node
pub fn format_plan(plan: &Plan) -> String {
    let mut output = String::new();
    output.push_str("Execution Plan\n");
    output.push_str(&"=".repeat(50));
    output.push('\n');
    format_chain(plan, plan.root(), 0, &mut output);
    output
}

fn format_chain(plan: &Plan, top: NodeId, depth: usize, output: &mut String) {
    let mut chain = plan.execution_order(top);
    chain.reverse();
    let count = chain.len();
    for (position, id) in chain.into_iter().enumerate() {
        let Some(node) = plan.node(id) else {
            continue;
        };
        let mut prefix = "│   ".repeat(depth);
        prefix.push_str(if position + 1 == count { "└── " } else { "├── " });

        let estimate = node
            .estimate
            .map(|e| format!(" (rows={}, cost={:.2})", e.estimated_nr_items, e.estimated_cost))
            .unwrap_or_default();
        output.push_str(&format!(
            "{}{} {}{}{}\n",
            prefix,
            id,
            node.type_name(),
            describe(plan, &node.kind),
            estimate
        ));

        if let NodeKind::Subquery { body, .. } = &node.kind {
            format_chain(plan, *body, depth + 1, output);
        }
    }
}

fn describe(plan: &Plan, kind: &NodeKind) -> String {
    let vars = plan.variables();
    match kind {
        NodeKind::EnumerateCollection {
            collection,
            out_var,
            random,
        } => {
            let order = if *random { " (random order)" } else { "" };
            format!(" {} IN {}{}", vars.name(*out_var), collection, order)
        }
        NodeKind::EnumerateList { in_var, out_var } => {
            format!(" {} IN {}", vars.name(*out_var), vars.name(*in_var))
        }
        NodeKind::Index {
            collection,
            out_var,
            lookups,
            fulltext,
            ..
        } => {
            let indexes: Vec<&str> = match fulltext {
                Some(lookup) => vec![lookup.index.index_type.as_str()],
                None => lookups
                    .iter()
                    .map(|lookup| lookup.index.index_type.as_str())
                    .collect(),
            };
            format!(
                " {} IN {} [{}]",
                vars.name(*out_var),
                collection,
                indexes.join(", ")
            )
        }
        NodeKind::Filter { in_var } | NodeKind::Return { in_var } => {
            format!(" {}", vars.name(*in_var))
        }
        NodeKind::Calculation {
            out_var,
            expression,
        } => format!(" {} = {}", vars.name(*out_var), expression.render(vars)),
        NodeKind::Sort { elements } => {
            let elements: Vec<String> = elements
                .iter()
                .map(|e| {
                    format!(
                        "{} {}",
                        vars.name(e.var),
                        if e.ascending { "ASC" } else { "DESC" }
                    )
                })
                .collect();
            format!(" {}", elements.join(", "))
        }
        NodeKind::Limit { offset, limit, .. } => format!(" {}, {}", offset, limit),
        NodeKind::Subquery { out_var, .. } => format!(" {}", vars.name(*out_var)),
        NodeKind::Gather {
            sort_mode, shards, ..
        } => format!(" sortmode={} shards={}", sort_mode.as_str(), shards),
        NodeKind::Scatter { collection } | NodeKind::Distribute { collection, .. } => {
            format!(" {}", collection)
        }
        _ => String::new(),
    }
}
