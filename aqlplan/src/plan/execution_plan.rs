// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution plan: an arena of nodes linked by dependency ids
//!
//! The main chain runs from the root Return node down to the Singleton
//! through first dependencies. Subquery nodes reference the Return node of a
//! nested chain that lives in the same arena. Cloning a plan copies the whole
//! arena without renumbering: node ids are preserved so rules can relate
//! nodes of sibling plans, and each clone continues its own id allocator from
//! the copied position. Ids are only unique within one plan.

use crate::catalog::Catalog;
use crate::plan::cost::{CostEstimate, CostModel};
use crate::plan::error::{PlanError, PlanResult};
use crate::plan::expression::{Expr, VarId, VariableTable};
use crate::plan::node::{NodeId, NodeKind, PlanNode};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    nodes: BTreeMap<NodeId, PlanNode>,
    root: NodeId,
    next_id: usize,
    variables: VariableTable,
    applied_rules: Vec<&'static str>,
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl Plan {
    /// Plan consisting of a single Singleton node, which is also the root
    /// until [`Plan::set_root`] is called
    pub fn new() -> Self {
        let root = NodeId(1);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root,
            PlanNode {
                id: root,
                kind: NodeKind::Singleton,
                dependencies: Vec::new(),
                estimate: None,
            },
        );
        Self {
            nodes,
            root,
            next_id: 2,
            variables: VariableTable::new(),
            applied_rules: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, root: NodeId) -> PlanResult<()> {
        self.get(root)?;
        self.root = root;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(&id)
    }

    pub fn get(&self, id: NodeId) -> PlanResult<&PlanNode> {
        self.nodes.get(&id).ok_or(PlanError::DanglingDependency(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> PlanResult<&mut PlanNode> {
        self.nodes
            .get_mut(&id)
            .ok_or(PlanError::DanglingDependency(id))
    }

    pub fn kind(&self, id: NodeId) -> PlanResult<&NodeKind> {
        Ok(&self.get(id)?.kind)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableTable {
        &mut self.variables
    }

    /// Names of the rules that modified this plan, in application order
    pub fn applied_rules(&self) -> &[&'static str] {
        &self.applied_rules
    }

    pub fn add_applied_rule(&mut self, rule: &'static str) {
        self.applied_rules.push(rule);
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a node with explicit dependencies, which must already exist
    pub fn add_node(&mut self, kind: NodeKind, dependencies: Vec<NodeId>) -> PlanResult<NodeId> {
        for dependency in &dependencies {
            self.get(*dependency)?;
        }
        if let NodeKind::Subquery { body, .. } = &kind {
            self.get(*body)?;
        }
        let id = self.allocate_id();
        self.nodes.insert(
            id,
            PlanNode {
                id,
                kind,
                dependencies,
                estimate: None,
            },
        );
        Ok(id)
    }

    /// Copy one node under a fresh id. The copy keeps the original's
    /// dependencies; a Subquery copy gets a deep copy of its nested chain.
    pub fn clone_node(&mut self, id: NodeId) -> PlanResult<NodeId> {
        let original = self.get(id)?.clone();
        let mut kind = original.kind;
        if let NodeKind::Subquery { body, .. } = &mut kind {
            *body = self.clone_subquery_body(*body)?;
        }
        let new_id = self.allocate_id();
        self.nodes.insert(
            new_id,
            PlanNode {
                id: new_id,
                kind,
                dependencies: original.dependencies,
                estimate: original.estimate,
            },
        );
        Ok(new_id)
    }

    fn clone_subquery_body(&mut self, body: NodeId) -> PlanResult<NodeId> {
        let chain = self
            .chain(body)
            .map_err(|e| PlanError::InvalidSubplan(e.to_string()))?;
        let top_is_return = matches!(
            chain.first().and_then(|id| self.node(*id)).map(|n| &n.kind),
            Some(NodeKind::Return { .. })
        );
        let bottom_is_singleton = matches!(
            chain.last().and_then(|id| self.node(*id)).map(|n| &n.kind),
            Some(NodeKind::Singleton)
        );
        if !top_is_return || !bottom_is_singleton {
            return Err(PlanError::InvalidSubplan(format!(
                "subquery {} is not a Singleton to Return chain",
                body
            )));
        }

        let mut previous: Option<NodeId> = None;
        for id in chain.iter().rev() {
            let copy = self.clone_node(*id)?;
            self.get_mut(copy)?.dependencies = previous.into_iter().collect();
            previous = Some(copy);
        }
        previous.ok_or_else(|| PlanError::InvalidSubplan(format!("subquery {} is empty", body)))
    }

    /// Nodes from `top` down to the bottom of its chain, `top` first
    pub fn chain(&self, top: NodeId) -> PlanResult<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut current = Some(top);
        while let Some(id) = current {
            if chain.len() > self.nodes.len() {
                return Err(PlanError::InvalidQuery(format!(
                    "dependency cycle through node {}",
                    id
                )));
            }
            let node = self.get(id)?;
            chain.push(id);
            current = node.dependency();
        }
        Ok(chain)
    }

    /// The main chain in execution order, Singleton first
    pub fn main_chain(&self) -> Vec<NodeId> {
        self.execution_order(self.root)
    }

    /// Chain below and including `top` in execution order; stops at a
    /// dangling dependency
    pub fn execution_order(&self, top: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(top);
        while let Some(id) = current {
            match self.node(id) {
                Some(node) if chain.len() <= self.nodes.len() => {
                    chain.push(id);
                    current = node.dependency();
                }
                _ => break,
            }
        }
        chain.reverse();
        chain
    }

    /// Top nodes of every chain: the root first, then subquery bodies in
    /// execution order, nested bodies after their parents
    pub fn chain_tops(&self) -> Vec<NodeId> {
        let mut tops = vec![self.root];
        let mut index = 0;
        while index < tops.len() {
            for id in self.execution_order(tops[index]) {
                if let Some(NodeKind::Subquery { body, .. }) = self.node(id).map(|n| &n.kind) {
                    if !tops.contains(body) {
                        tops.push(*body);
                    }
                }
            }
            index += 1;
        }
        tops
    }

    /// Matching nodes in execution order, main chain first
    pub fn find_nodes<F>(&self, predicate: F, enter_subqueries: bool) -> Vec<NodeId>
    where
        F: Fn(&PlanNode) -> bool,
    {
        let tops = if enter_subqueries {
            self.chain_tops()
        } else {
            vec![self.root]
        };
        tops.into_iter()
            .flat_map(|top| self.execution_order(top))
            .filter(|id| self.node(*id).map(&predicate).unwrap_or(false))
            .collect()
    }

    /// Nodes that list `id` as a dependency
    pub fn parents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.dependencies.contains(&id))
            .map(|node| node.id)
            .collect()
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.parents_of(id).into_iter().next()
    }

    pub fn replace_dependency(&mut self, node: NodeId, old: NodeId, new: NodeId) -> PlanResult<()> {
        self.get(new)?;
        let node = self.get_mut(node)?;
        for dependency in node.dependencies.iter_mut() {
            if *dependency == old {
                *dependency = new;
            }
        }
        Ok(())
    }

    /// Take a node out of its chain and drop it; its parents inherit its
    /// dependency
    pub fn unlink_node(&mut self, id: NodeId) -> PlanResult<PlanNode> {
        self.detach(id)?;
        self.nodes.remove(&id).ok_or(PlanError::DanglingDependency(id))
    }

    /// Take a node out of its chain but keep it in the arena without
    /// dependencies, ready to be inserted elsewhere
    pub fn detach(&mut self, id: NodeId) -> PlanResult<()> {
        if id == self.root {
            return Err(PlanError::InvalidQuery(format!(
                "cannot unlink the root node {}",
                id
            )));
        }
        let dependency = self.get(id)?.dependency().ok_or_else(|| {
            PlanError::InvalidQuery(format!("cannot unlink node {} without dependency", id))
        })?;
        for parent in self.parents_of(id) {
            self.replace_dependency(parent, id, dependency)?;
        }
        self.repoint_subquery_bodies(id, dependency);
        self.get_mut(id)?.dependencies.clear();
        Ok(())
    }

    fn repoint_subquery_bodies(&mut self, old: NodeId, new: NodeId) {
        for node in self.nodes.values_mut() {
            if let NodeKind::Subquery { body, .. } = &mut node.kind {
                if *body == old {
                    *body = new;
                }
            }
        }
    }

    /// Insert `new_node` directly below `parent`: it takes over the
    /// parent's dependencies and becomes the parent's only dependency
    pub fn insert_dependency(&mut self, parent: NodeId, new_node: NodeId) -> PlanResult<()> {
        let dependencies = self.get(parent)?.dependencies.clone();
        self.get_mut(new_node)?.dependencies = dependencies;
        self.get_mut(parent)?.dependencies = vec![new_node];
        Ok(())
    }

    /// Insert a detached node directly above `child`, in front of all of
    /// `child`'s parents
    pub fn insert_above(&mut self, child: NodeId, new_node: NodeId) -> PlanResult<()> {
        for parent in self.parents_of(child) {
            if parent != new_node {
                self.replace_dependency(parent, child, new_node)?;
            }
        }
        if self.root == child {
            self.root = new_node;
        }
        self.repoint_subquery_bodies(child, new_node);
        self.get_mut(new_node)?.dependencies = vec![child];
        Ok(())
    }

    /// Move a node so that it sits directly below `parent`
    pub fn move_below(&mut self, id: NodeId, parent: NodeId) -> PlanResult<()> {
        self.detach(id)?;
        self.insert_dependency(parent, id)
    }

    /// Swap the kind of a node, keeping its id and position
    pub fn replace_node(&mut self, id: NodeId, kind: NodeKind) -> PlanResult<NodeKind> {
        let node = self.get_mut(id)?;
        Ok(std::mem::replace(&mut node.kind, kind))
    }

    /// Node that sets `var`
    pub fn var_setter(&self, var: VarId) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| node.kind.variables_set_here().contains(&var))
            .map(|node| node.id)
    }

    /// Expression of the Calculation node that sets `var`
    pub fn calculation_of(&self, var: VarId) -> Option<&Expr> {
        let setter = self.var_setter(var)?;
        match &self.node(setter)?.kind {
            NodeKind::Calculation { expression, .. } => Some(expression),
            _ => None,
        }
    }

    /// Variables read by a node; for a Subquery, the variables its nested
    /// chain reads from the enclosing scope
    pub fn variables_used_by(&self, id: NodeId) -> BTreeSet<VarId> {
        let Some(node) = self.node(id) else {
            return BTreeSet::new();
        };
        let mut used = node.kind.variables_used();
        if let NodeKind::Subquery { body, .. } = &node.kind {
            let mut set_inside = BTreeSet::new();
            let mut used_inside = BTreeSet::new();
            for inner in self.execution_order(*body) {
                used_inside.extend(self.variables_used_by(inner));
                if let Some(inner_node) = self.node(inner) {
                    set_inside.extend(inner_node.kind.variables_set_here());
                }
            }
            used.extend(used_inside.difference(&set_inside).copied());
        }
        used
    }

    /// Whether any node still reads `var`
    pub fn is_variable_used(&self, var: VarId) -> bool {
        self.nodes
            .keys()
            .any(|id| self.variables_used_by(*id).contains(&var))
    }

    /// Subquery node whose nested chain contains `id`
    pub fn enclosing_subquery(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.values().find_map(|node| match &node.kind {
            NodeKind::Subquery { body, .. } if self.execution_order(*body).contains(&id) => {
                Some(node.id)
            }
            _ => None,
        })
    }

    /// Variables set strictly below `id`, including the enclosing scope of
    /// a subquery chain
    pub fn variables_available_at(&self, id: NodeId) -> BTreeSet<VarId> {
        let mut available = BTreeSet::new();
        let order = self.execution_order(id);
        for below in order.iter().take(order.len().saturating_sub(1)) {
            if let Some(node) = self.node(*below) {
                available.extend(node.kind.variables_set_here());
            }
        }
        if let Some(subquery) = self.enclosing_subquery(id) {
            available.extend(self.variables_available_at(subquery));
        }
        available
    }

    /// Collections accessed anywhere in the plan, sorted
    pub fn collections(&self) -> Vec<String> {
        let mut collections = BTreeSet::new();
        for node in self.nodes.values() {
            match &node.kind {
                NodeKind::EnumerateCollection { collection, .. }
                | NodeKind::Index { collection, .. } => {
                    collections.insert(collection.clone());
                }
                NodeKind::Traversal(spec) => {
                    collections.insert(spec.edge_collection.clone());
                }
                NodeKind::Calculation { expression, .. } => {
                    collect_collection_arguments(expression, &mut collections);
                }
                _ => {}
            }
        }
        collections.into_iter().collect()
    }

    /// Dependency order over all nodes, nested chains before their Subquery
    pub fn topological_order(&self) -> PlanResult<Vec<NodeId>> {
        let mut graph: DiGraphMap<NodeId, ()> = DiGraphMap::new();
        for node in self.nodes.values() {
            graph.add_node(node.id);
        }
        for node in self.nodes.values() {
            for dependency in &node.dependencies {
                self.get(*dependency)?;
                graph.add_edge(*dependency, node.id, ());
            }
            if let NodeKind::Subquery { body, .. } = &node.kind {
                self.get(*body)?;
                graph.add_edge(*body, node.id, ());
            }
        }
        toposort(&graph, None).map_err(|cycle| {
            PlanError::InvalidQuery(format!(
                "dependency cycle through node {}",
                cycle.node_id()
            ))
        })
    }

    /// Ids of all nodes reachable from the root, through dependencies and
    /// subquery bodies
    pub fn reachable_nodes(&self) -> BTreeSet<NodeId> {
        self.chain_tops()
            .into_iter()
            .flat_map(|top| self.execution_order(top))
            .collect()
    }

    /// Drop nodes that are no longer reachable from the root
    pub fn prune_unreachable(&mut self) -> usize {
        let reachable = self.reachable_nodes();
        let before = self.nodes.len();
        self.nodes.retain(|id, _| reachable.contains(id));
        before - self.nodes.len()
    }

    /// Re-estimate every reachable node bottom-up
    pub fn estimate_costs(&mut self, model: &CostModel, catalog: &dyn Catalog) -> PlanResult<()> {
        let reachable = self.reachable_nodes();
        for id in self.topological_order()? {
            if !reachable.contains(&id) {
                continue;
            }
            let estimate = model.estimate_node(self, id, catalog)?;
            self.get_mut(id)?.estimate = Some(estimate);
        }
        Ok(())
    }

    pub fn root_estimate(&self) -> Option<CostEstimate> {
        self.node(self.root).and_then(|node| node.estimate)
    }

    /// Cost of the root node, which accumulates the cost of the whole plan
    pub fn total_cost(&self) -> f64 {
        self.root_estimate()
            .map(|estimate| estimate.estimated_cost)
            .unwrap_or(f64::INFINITY)
    }

    /// Check the structural and data-flow invariants
    pub fn validate(&self) -> PlanResult<()> {
        self.topological_order()?;

        if !matches!(self.kind(self.root)?, NodeKind::Return { .. }) {
            return Err(PlanError::InvalidQuery(format!(
                "root node {} is not a Return node",
                self.root
            )));
        }
        self.validate_chain(self.root)
            .map_err(PlanError::InvalidQuery)?;
        for top in self.chain_tops().into_iter().skip(1) {
            self.validate_chain(top).map_err(PlanError::InvalidSubplan)?;
        }

        for top in self.chain_tops() {
            for id in self.execution_order(top) {
                let available = self.variables_available_at(id);
                if let Some(missing) = self
                    .variables_used_by(id)
                    .into_iter()
                    .find(|var| !available.contains(var))
                {
                    return Err(PlanError::UnknownVariable(
                        self.variables.name(missing).to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_chain(&self, top: NodeId) -> Result<(), String> {
        let chain = self.chain(top).map_err(|e| e.to_string())?;
        for id in &chain {
            let node = self.get(*id).map_err(|e| e.to_string())?;
            if node.dependencies.len() > 1 {
                return Err(format!("node {} has more than one dependency", id));
            }
        }
        let singletons = chain
            .iter()
            .filter(|id| matches!(self.node(**id).map(|n| &n.kind), Some(NodeKind::Singleton)))
            .count();
        let ends_in_singleton = matches!(
            chain.last().and_then(|id| self.node(*id)).map(|n| &n.kind),
            Some(NodeKind::Singleton)
        );
        if singletons != 1 || !ends_in_singleton {
            return Err(format!(
                "chain from node {} must end in exactly one Singleton",
                top
            ));
        }
        Ok(())
    }
}

fn collect_collection_arguments(expr: &Expr, collections: &mut BTreeSet<String>) {
    match expr {
        Expr::Collection(name) => {
            collections.insert(name.clone());
        }
        Expr::Function { arguments, .. } | Expr::Array(arguments) => {
            for argument in arguments {
                collect_collection_arguments(argument, collections);
            }
        }
        _ => {}
    }
}
