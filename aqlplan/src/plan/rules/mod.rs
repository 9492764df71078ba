// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rewrite rule registry
//!
//! Rules are registered once, ordered by pass number (registration order
//! breaks ties) and never change afterwards, so the registry can be shared by
//! every optimizer run. A rule is a matcher that cheaply decides whether it
//! applies and a rewriter that takes the plan by value and hands back the
//! rewritten plan, or several alternatives.

pub mod cluster;
pub mod conditions;
pub mod general;
pub mod indexes;

use crate::catalog::Catalog;
use crate::config::OptimizerConfig;
use crate::plan::error::PlanResult;
use crate::plan::execution_plan::Plan;
use once_cell::sync::Lazy;
use std::collections::BTreeSet;

/// Read-only inputs of a rule application
pub struct RuleContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub config: &'a OptimizerConfig,
}

/// Outcome of a rewriter
#[derive(Debug)]
pub enum Rewrite {
    Unchanged(Plan),
    Modified(Plan),
    /// Mutually exclusive siblings, each flagged as modified or not
    Alternatives(Vec<(Plan, bool)>),
}

pub type Matcher = fn(&Plan, &RuleContext) -> bool;
pub type Rewriter = fn(Plan, &RuleContext) -> PlanResult<Rewrite>;

pub struct Rule {
    pub name: &'static str,
    pub pass: u32,
    pub can_be_disabled: bool,
    pub cluster_only: bool,
    pub matcher: Matcher,
    pub rewriter: Rewriter,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("pass", &self.pass)
            .field("can_be_disabled", &self.can_be_disabled)
            .field("cluster_only", &self.cluster_only)
            .finish()
    }
}

impl Rule {
    fn new(name: &'static str, pass: u32, matcher: Matcher, rewriter: Rewriter) -> Self {
        Self {
            name,
            pass,
            can_be_disabled: true,
            cluster_only: false,
            matcher,
            rewriter,
        }
    }

    fn cluster(mut self) -> Self {
        self.cluster_only = true;
        self
    }

    fn required(mut self) -> Self {
        self.can_be_disabled = false;
        self
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let mut rules = vec![
        Rule::new(
            "remove-unnecessary-filters",
            100,
            general::has_constant_filter,
            general::remove_unnecessary_filters,
        ),
        Rule::new(
            "split-filters",
            102,
            conditions::has_conjunctive_filter,
            conditions::split_filters,
        ),
        Rule::new(
            "replace-or-with-in",
            104,
            conditions::has_disjunctive_filter,
            conditions::replace_or_with_in,
        ),
        Rule::new(
            "remove-redundant-or",
            106,
            conditions::has_disjunctive_filter,
            conditions::remove_redundant_or,
        ),
        Rule::new(
            "remove-redundant-calculations",
            108,
            general::has_calculation,
            general::remove_redundant_calculations,
        ),
        Rule::new(
            "move-calculations-up",
            110,
            general::has_calculation,
            general::move_calculations_up,
        ),
        Rule::new(
            "move-filters-up",
            120,
            general::has_filter,
            general::move_filters_up,
        ),
        Rule::new(
            "remove-redundant-sorts",
            130,
            general::has_sort,
            general::remove_redundant_sorts,
        ),
        Rule::new(
            "remove-sort-rand",
            135,
            general::has_random_sort,
            general::remove_sort_rand,
        ),
        Rule::new(
            "remove-unnecessary-calculations",
            140,
            general::has_calculation,
            general::remove_unnecessary_calculations,
        ),
        Rule::new(
            "fuse-calculations",
            150,
            general::has_calculation,
            general::fuse_calculations,
        ),
        Rule::new(
            "interchange-adjacent-enumerations",
            200,
            general::has_adjacent_enumerations,
            general::interchange_adjacent_enumerations,
        ),
        Rule::new(
            "replace-function-with-index",
            290,
            indexes::has_fulltext_call,
            indexes::replace_function_with_index,
        ),
        Rule::new(
            "use-indexes",
            300,
            indexes::has_filtered_collection_scan,
            indexes::use_indexes,
        ),
        Rule::new(
            "remove-filter-covered-by-index",
            310,
            indexes::has_index_lookup,
            indexes::remove_filter_covered_by_index,
        ),
        Rule::new(
            "use-index-for-sort",
            320,
            general::has_sort,
            indexes::use_index_for_sort,
        ),
        Rule::new(
            "remove-unnecessary-calculations-2",
            400,
            general::has_calculation,
            general::remove_unnecessary_calculations,
        ),
        Rule::new(
            "scatter-in-cluster",
            1000,
            cluster::has_undistributed_access,
            cluster::scatter_in_cluster,
        )
        .cluster()
        .required(),
        Rule::new(
            "cluster-one-shard",
            1010,
            cluster::has_distribution,
            cluster::cluster_one_shard,
        )
        .cluster(),
        Rule::new(
            "distribute-filtercalc-to-cluster",
            1020,
            cluster::has_gather,
            cluster::distribute_filtercalc_to_cluster,
        )
        .cluster(),
        Rule::new(
            "distribute-sort-to-cluster",
            1030,
            cluster::has_gather,
            cluster::distribute_sort_to_cluster,
        )
        .cluster(),
        Rule::new(
            "remove-unnecessary-remote-scatter",
            1040,
            cluster::has_scatter,
            cluster::remove_unnecessary_remote_scatter,
        )
        .cluster(),
        Rule::new(
            "decay-unnecessary-sorted-gather",
            1050,
            cluster::has_sorted_gather,
            cluster::decay_unnecessary_sorted_gather,
        )
        .cluster(),
    ];
    // stable, so registration order breaks ties
    rules.sort_by_key(|rule| rule.pass);
    rules
});

/// All rules in application order
pub fn registry() -> &'static [Rule] {
    &RULES
}

pub fn rule_by_name(name: &str) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.name == name)
}

/// Enabled rule names after applying `+name`, `-name`, `+all`, `-all`
/// switches left to right
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSelection {
    enabled: BTreeSet<&'static str>,
    warnings: Vec<String>,
}

impl Default for RuleSelection {
    fn default() -> Self {
        Self {
            enabled: RULES.iter().map(|rule| rule.name).collect(),
            warnings: Vec::new(),
        }
    }
}

impl RuleSelection {
    pub fn new<S: AsRef<str>>(switches: &[S]) -> Self {
        let mut selection = Self::default();
        selection.apply(switches);
        selection
    }

    pub fn apply<S: AsRef<str>>(&mut self, switches: &[S]) {
        for switch in switches {
            let switch = switch.as_ref().trim();
            let (enable, name) = match switch.strip_prefix('-') {
                Some(name) => (false, name),
                None => (true, switch.strip_prefix('+').unwrap_or(switch)),
            };
            if name == "all" {
                for rule in RULES.iter() {
                    self.set(rule.name, enable);
                }
                continue;
            }
            match rule_by_name(name) {
                Some(rule) => self.set(rule.name, enable),
                None => {
                    log::warn!("Ignoring unknown optimizer rule '{}'", name);
                    self.warnings
                        .push(format!("unknown optimizer rule '{}' ignored", name));
                }
            }
        }
    }

    fn set(&mut self, name: &'static str, enable: bool) {
        if enable {
            self.enabled.insert(name);
        } else {
            self.enabled.remove(name);
        }
    }

    /// Rules that cannot be disabled are always enabled
    pub fn is_enabled(&self, rule: &Rule) -> bool {
        !rule.can_be_disabled || self.enabled.contains(rule.name)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order() {
        let passes: Vec<u32> = registry().iter().map(|rule| rule.pass).collect();
        let mut sorted = passes.clone();
        sorted.sort();
        assert_eq!(passes, sorted);
        assert_eq!(registry()[0].name, "remove-unnecessary-filters");
        let names: Vec<&str> = registry().iter().map(|rule| rule.name).collect();
        let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
        assert!(position("split-filters") < position("move-filters-up"));
        assert!(position("replace-or-with-in") < position("use-indexes"));
        assert!(position("remove-sort-rand") < position("remove-unnecessary-calculations"));
        assert!(position("fuse-calculations") > position("remove-unnecessary-calculations"));
        assert!(!rule_by_name("scatter-in-cluster").unwrap().can_be_disabled);
        assert!(rule_by_name("decay-unnecessary-sorted-gather")
            .unwrap()
            .cluster_only);
    }

    #[test]
    fn test_switches_apply_left_to_right() {
        let use_indexes = rule_by_name("use-indexes").unwrap();
        let sorts = rule_by_name("remove-redundant-sorts").unwrap();
        let scatter = rule_by_name("scatter-in-cluster").unwrap();

        let selection = RuleSelection::new(&["-all", "+use-indexes"]);
        assert!(selection.is_enabled(use_indexes));
        assert!(!selection.is_enabled(sorts));
        assert!(selection.is_enabled(scatter));

        let selection = RuleSelection::new(&["+use-indexes", "-all"]);
        assert!(!selection.is_enabled(use_indexes));

        let selection = RuleSelection::new(&["-use-indexes", "use-indexes"]);
        assert!(selection.is_enabled(use_indexes));

        let selection = RuleSelection::new(&["-no-such-rule"]);
        assert_eq!(selection, RuleSelection {
            warnings: vec!["unknown optimizer rule 'no-such-rule' ignored".to_string()],
            ..RuleSelection::default()
        });
    }
}
