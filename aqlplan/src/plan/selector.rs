// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Choice of the plan to execute among the optimizer's candidates

use crate::plan::error::{PlanError, PlanResult};
use crate::plan::execution_plan::Plan;

/// Lowest estimated cost wins; ties go to the plan with fewer nodes, then
/// to the earlier candidate
pub fn select_plan(candidates: Vec<Plan>) -> PlanResult<(Plan, Vec<Plan>)> {
    let best = candidates
        .iter()
        .enumerate()
        .min_by(|(i, a), (j, b)| {
            a.total_cost()
                .total_cmp(&b.total_cost())
                .then(a.node_count().cmp(&b.node_count()))
                .then(i.cmp(j))
        })
        .map(|(position, _)| position)
        .ok_or(PlanError::NoCandidatePlans)?;

    let mut others = candidates;
    let chosen = others.remove(best);
    log::debug!(
        "Selected plan {} of {} with cost {}",
        best + 1,
        others.len() + 1,
        chosen.total_cost()
    );
    Ok((chosen, others))
}
