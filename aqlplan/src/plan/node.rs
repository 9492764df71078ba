// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution plan node kinds
//!
//! Plan nodes form a closed sum type. Rules pattern-match on [`NodeKind`]
//! instead of comparing type strings; the type strings only exist for the
//! explain output.

use crate::ast::EdgeDirection;
use crate::catalog::IndexDescriptor;
use crate::plan::cost::CostEstimate;
use crate::plan::expression::{Expr, VarId};
use crate::plan::index_selection::AttributeTerm;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Node identifier, unique within one plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One sort criterion: a variable, optionally an attribute path below it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortElement {
    pub var: VarId,
    pub ascending: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl SortElement {
    pub fn new(var: VarId, ascending: bool) -> Self {
        Self {
            var,
            ascending,
            path: Vec::new(),
        }
    }
}

/// Merge strategy of a Gather node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortMode {
    /// Concatenate shard streams, order is irrelevant
    #[serde(rename = "unset")]
    Unset,
    /// Linear scan over the shard heads, for few shards
    #[serde(rename = "minelement")]
    MinElement,
    /// Binary heap k-way merge
    #[serde(rename = "heap")]
    Heap,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Unset => "unset",
            SortMode::MinElement => "minelement",
            SortMode::Heap => "heap",
        }
    }
}

/// Attribute terms answered by one index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexLookup {
    pub index: IndexDescriptor,
    /// Empty for a full index scan
    pub terms: Vec<AttributeTerm>,
}

/// `FULLTEXT(collection, attribute, query[, limit])` answered by an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulltextLookup {
    pub index: IndexDescriptor,
    pub query: Expr,
    pub limit: Option<Expr>,
}

/// Order in which an index produces documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSort {
    pub ascending: bool,
    pub paths: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunction {
    Length,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "LENGTH" | "COUNT" => Some(AggregateFunction::Length),
            "SUM" => Some(AggregateFunction::Sum),
            "MIN" => Some(AggregateFunction::Min),
            "MAX" => Some(AggregateFunction::Max),
            "AVERAGE" | "AVG" => Some(AggregateFunction::Average),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Length => "LENGTH",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Average => "AVERAGE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectGroup {
    pub out_var: VarId,
    pub in_var: VarId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectAggregate {
    pub out_var: VarId,
    pub function: AggregateFunction,
    pub in_var: VarId,
}

/// `INTO var`: the group's rows, as objects of the listed variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectInto {
    pub out_var: VarId,
    pub kept: Vec<(String, VarId)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectSpec {
    pub groups: Vec<CollectGroup>,
    pub aggregates: Vec<CollectAggregate>,
    pub into: Option<CollectInto>,
    pub count_into: Option<VarId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalSpec {
    pub start_var: VarId,
    pub vertex_var: VarId,
    pub edge_var: Option<VarId>,
    pub path_var: Option<VarId>,
    pub min_depth: u64,
    pub max_depth: u64,
    pub direction: EdgeDirection,
    pub edge_collection: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Singleton,
    EnumerateCollection {
        collection: String,
        out_var: VarId,
        /// Documents come out in random order
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        random: bool,
    },
    EnumerateList {
        in_var: VarId,
        out_var: VarId,
    },
    Index {
        collection: String,
        out_var: VarId,
        /// One lookup per OR branch
        lookups: Vec<IndexLookup>,
        fulltext: Option<FulltextLookup>,
        sort: Option<IndexSort>,
    },
    Filter {
        in_var: VarId,
    },
    Calculation {
        out_var: VarId,
        expression: Expr,
    },
    Sort {
        elements: Vec<SortElement>,
    },
    Limit {
        offset: u64,
        limit: u64,
        full_count: bool,
    },
    Collect(CollectSpec),
    /// `body` is the Return node of the nested chain
    Subquery {
        body: NodeId,
        out_var: VarId,
    },
    Traversal(TraversalSpec),
    Gather {
        collection: String,
        elements: Vec<SortElement>,
        sort_mode: SortMode,
        shards: usize,
    },
    Scatter {
        collection: String,
    },
    /// Routes each row to the shard owning the given shard key values
    Distribute {
        collection: String,
        keys: Vec<Expr>,
    },
    Remote,
    NoResults,
    Return {
        in_var: VarId,
    },
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Singleton => "SingletonNode",
            NodeKind::EnumerateCollection { .. } => "EnumerateCollectionNode",
            NodeKind::EnumerateList { .. } => "EnumerateListNode",
            NodeKind::Index { .. } => "IndexNode",
            NodeKind::Filter { .. } => "FilterNode",
            NodeKind::Calculation { .. } => "CalculationNode",
            NodeKind::Sort { .. } => "SortNode",
            NodeKind::Limit { .. } => "LimitNode",
            NodeKind::Collect(_) => "CollectNode",
            NodeKind::Subquery { .. } => "SubqueryNode",
            NodeKind::Traversal(_) => "TraversalNode",
            NodeKind::Gather { .. } => "GatherNode",
            NodeKind::Scatter { .. } => "ScatterNode",
            NodeKind::Distribute { .. } => "DistributeNode",
            NodeKind::Remote => "RemoteNode",
            NodeKind::NoResults => "NoResultsNode",
            NodeKind::Return { .. } => "ReturnNode",
        }
    }

    /// Variables introduced by this node
    pub fn variables_set_here(&self) -> Vec<VarId> {
        match self {
            NodeKind::EnumerateCollection { out_var, .. }
            | NodeKind::EnumerateList { out_var, .. }
            | NodeKind::Index { out_var, .. }
            | NodeKind::Calculation { out_var, .. }
            | NodeKind::Subquery { out_var, .. } => vec![*out_var],
            NodeKind::Collect(spec) => {
                let mut vars: Vec<VarId> = spec.groups.iter().map(|g| g.out_var).collect();
                vars.extend(spec.aggregates.iter().map(|a| a.out_var));
                vars.extend(spec.into.iter().map(|i| i.out_var));
                vars.extend(spec.count_into);
                vars
            }
            NodeKind::Traversal(spec) => {
                let mut vars = vec![spec.vertex_var];
                vars.extend(spec.edge_var);
                vars.extend(spec.path_var);
                vars
            }
            _ => Vec::new(),
        }
    }

    /// Variables read by this node itself; a Subquery's body is accounted
    /// for by the plan
    pub fn variables_used(&self) -> BTreeSet<VarId> {
        let mut used = BTreeSet::new();
        match self {
            NodeKind::EnumerateList { in_var, .. }
            | NodeKind::Filter { in_var }
            | NodeKind::Return { in_var } => {
                used.insert(*in_var);
            }
            NodeKind::Index {
                lookups, fulltext, ..
            } => {
                for lookup in lookups {
                    for term in &lookup.terms {
                        used.extend(term.value.variables_used());
                    }
                }
                if let Some(fulltext) = fulltext {
                    used.extend(fulltext.query.variables_used());
                    if let Some(limit) = &fulltext.limit {
                        used.extend(limit.variables_used());
                    }
                }
            }
            NodeKind::Calculation { expression, .. } => {
                used.extend(expression.variables_used());
            }
            NodeKind::Sort { elements } | NodeKind::Gather { elements, .. } => {
                used.extend(elements.iter().map(|e| e.var));
            }
            NodeKind::Collect(spec) => {
                used.extend(spec.groups.iter().map(|g| g.in_var));
                used.extend(spec.aggregates.iter().map(|a| a.in_var));
                if let Some(into) = &spec.into {
                    used.extend(into.kept.iter().map(|(_, var)| *var));
                }
            }
            NodeKind::Traversal(spec) => {
                used.insert(spec.start_var);
            }
            NodeKind::Distribute { keys, .. } => {
                for key in keys {
                    used.extend(key.variables_used());
                }
            }
            _ => {}
        }
        used
    }

    /// Make every read of `from` a read of `to`; variables set by the node
    /// stay untouched
    pub fn replace_variable(&mut self, from: VarId, to: VarId) {
        let swap = |var: &mut VarId| {
            if *var == from {
                *var = to;
            }
        };
        match self {
            NodeKind::EnumerateList { in_var, .. }
            | NodeKind::Filter { in_var }
            | NodeKind::Return { in_var } => swap(in_var),
            NodeKind::Index {
                lookups, fulltext, ..
            } => {
                for term in lookups.iter_mut().flat_map(|lookup| lookup.terms.iter_mut()) {
                    term.value.replace_variable(from, to);
                }
                if let Some(fulltext) = fulltext {
                    fulltext.query.replace_variable(from, to);
                    if let Some(limit) = &mut fulltext.limit {
                        limit.replace_variable(from, to);
                    }
                }
            }
            NodeKind::Calculation { expression, .. } => expression.replace_variable(from, to),
            NodeKind::Sort { elements } | NodeKind::Gather { elements, .. } => {
                elements.iter_mut().for_each(|element| swap(&mut element.var));
            }
            NodeKind::Collect(spec) => {
                spec.groups.iter_mut().for_each(|group| swap(&mut group.in_var));
                spec.aggregates
                    .iter_mut()
                    .for_each(|aggregate| swap(&mut aggregate.in_var));
                if let Some(into) = &mut spec.into {
                    into.kept.iter_mut().for_each(|(_, var)| swap(var));
                }
            }
            NodeKind::Traversal(spec) => swap(&mut spec.start_var),
            NodeKind::Distribute { keys, .. } => {
                keys.iter_mut()
                    .for_each(|key| key.replace_variable(from, to));
            }
            _ => {}
        }
    }

    /// Collection read by a document access node
    pub fn collection(&self) -> Option<&str> {
        match self {
            NodeKind::EnumerateCollection { collection, .. }
            | NodeKind::Index { collection, .. } => Some(collection),
            _ => None,
        }
    }

    pub fn is_distribution(&self) -> bool {
        matches!(
            self,
            NodeKind::Gather { .. }
                | NodeKind::Scatter { .. }
                | NodeKind::Distribute { .. }
                | NodeKind::Remote
        )
    }

    /// Nodes that produce more than one row per input row
    pub fn is_enumeration(&self) -> bool {
        matches!(
            self,
            NodeKind::EnumerateCollection { .. }
                | NodeKind::EnumerateList { .. }
                | NodeKind::Index { .. }
                | NodeKind::Traversal(_)
        )
    }
}

/// A node in the plan arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub dependencies: Vec<NodeId>,
    pub estimate: Option<CostEstimate>,
}

impl PlanNode {
    pub fn dependency(&self) -> Option<NodeId> {
        self.dependencies.first().copied()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables_of_collect() {
        let kind = NodeKind::Collect(CollectSpec {
            groups: vec![CollectGroup {
                out_var: VarId(5),
                in_var: VarId(2),
            }],
            aggregates: vec![CollectAggregate {
                out_var: VarId(6),
                function: AggregateFunction::Sum,
                in_var: VarId(3),
            }],
            into: None,
            count_into: Some(VarId(7)),
        });
        assert_eq!(
            kind.variables_set_here(),
            vec![VarId(5), VarId(6), VarId(7)]
        );
        assert_eq!(
            kind.variables_used().into_iter().collect::<Vec<_>>(),
            vec![VarId(2), VarId(3)]
        );
    }

    #[test]
    fn test_replace_variable_keeps_outputs() {
        let mut sort = NodeKind::Sort {
            elements: vec![SortElement::new(VarId(1), true), SortElement::new(VarId(2), false)],
        };
        sort.replace_variable(VarId(1), VarId(9));
        assert_eq!(
            sort.variables_used().into_iter().collect::<Vec<_>>(),
            vec![VarId(2), VarId(9)]
        );

        let mut calculation = NodeKind::Calculation {
            out_var: VarId(1),
            expression: Expr::Reference(VarId(1)),
        };
        calculation.replace_variable(VarId(1), VarId(3));
        assert_eq!(calculation.variables_set_here(), vec![VarId(1)]);
        assert!(calculation.variables_used().contains(&VarId(3)));
    }

    #[test]
    fn test_sort_mode_names() {
        assert_eq!(
            serde_json::to_value(SortMode::MinElement).unwrap(),
            serde_json::json!("minelement")
        );
        assert_eq!(SortMode::Heap.as_str(), "heap");
        assert_eq!(AggregateFunction::from_name("count"), Some(AggregateFunction::Length));
    }
}
