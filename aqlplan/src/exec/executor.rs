// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Reference executor
//!
//! Runs a plan over a [`DocumentStore`] by materializing the rows of every
//! node, dependencies first. It exists to check that optimized plans return
//! the same results as unoptimized ones, not for speed.
//!
//! Cluster plans run as a coordinator would run them: the subtree below a
//! Gather is executed once per shard with collection access restricted to
//! that shard, rows entering a region through a Scatter are computed once
//! on the coordinator and handed to every shard, and a Distribute hands each
//! row only to the shard owning it. Remote nodes pass rows through.

use crate::ast::EdgeDirection;
use crate::catalog::{Catalog, DocumentStore, IndexType};
use crate::exec::error::{ExecutionError, ExecutionResult};
use crate::exec::eval::{Bindings, Evaluator, FulltextSource};
use crate::exec::fulltext::{self, FulltextQuery};
use crate::exec::functions::aggregate;
use crate::exec::merge::{compare_keys, merge_shards, sort_key, sort_rows};
use crate::exec::result::{ExecutionStats, QueryResult};
use crate::exec::value::{compare_values, get_field, is_truthy};
use crate::plan::execution_plan::Plan;
use crate::plan::expression::{Expr, VarId};
use crate::plan::node::{
    CollectSpec, FulltextLookup, IndexLookup, IndexSort, NodeId, NodeKind, PlanNode,
    SortElement, TraversalSpec,
};
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

/// Default minimum word length of fulltext indexes
const DEFAULT_MIN_WORD_LENGTH: usize = 2;

/// Where a node runs: the row it is nested in and, inside a Gather region,
/// the collection shard it is restricted to
#[derive(Clone, Copy)]
struct Scope<'s> {
    outer: &'s Bindings,
    shard: Option<(&'s str, usize)>,
}

pub struct PlanExecutor<'a> {
    plan: &'a Plan,
    store: &'a dyn DocumentStore,
    catalog: &'a dyn Catalog,
    stats: RefCell<ExecutionStats>,
    full_count: RefCell<Option<u64>>,
    /// Rows computed on the coordinator for each Scatter or Distribute
    coordinator_rows: RefCell<HashMap<NodeId, Vec<Bindings>>>,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(plan: &'a Plan, store: &'a dyn DocumentStore, catalog: &'a dyn Catalog) -> Self {
        Self {
            plan,
            store,
            catalog,
            stats: RefCell::new(ExecutionStats::default()),
            full_count: RefCell::new(None),
            coordinator_rows: RefCell::new(HashMap::new()),
        }
    }

    /// Run the plan and return the values of its Return node
    pub fn execute(&self) -> ExecutionResult<QueryResult> {
        let start = Instant::now();
        self.coordinator_rows.borrow_mut().clear();
        *self.full_count.borrow_mut() = None;
        *self.stats.borrow_mut() = ExecutionStats::default();

        let root = self.node(self.plan.root())?;
        let NodeKind::Return { in_var } = &root.kind else {
            return Err(ExecutionError::InvalidPlan(
                root.id,
                "plan root is not a Return node".to_string(),
            ));
        };
        let outer = Bindings::new();
        let scope = Scope {
            outer: &outer,
            shard: None,
        };
        let rows: Vec<Value> = self
            .run(root.id, scope)?
            .into_iter()
            .map(|mut row| row.remove(in_var).unwrap_or(Value::Null))
            .collect();

        let mut stats = self.stats.borrow().clone();
        stats.execution_time = start.elapsed().as_secs_f64();
        log::debug!(
            "Executed plan: {} rows, {} scanned, {} filtered",
            rows.len(),
            stats.scanned_full + stats.scanned_index,
            stats.filtered
        );
        Ok(QueryResult {
            rows,
            full_count: *self.full_count.borrow(),
            stats,
        })
    }

    fn node(&self, id: NodeId) -> ExecutionResult<&'a PlanNode> {
        self.plan
            .node(id)
            .ok_or_else(|| ExecutionError::InvalidPlan(id, "node does not exist".to_string()))
    }

    fn dependency(&self, node: &PlanNode) -> ExecutionResult<NodeId> {
        node.dependency().ok_or_else(|| {
            ExecutionError::InvalidPlan(node.id, "node has no dependency".to_string())
        })
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(self.plan.variables()).with_fulltext(self)
    }

    /// Documents a node may read from `collection` in this scope
    fn documents(&self, collection: &str, scope: Scope<'_>) -> ExecutionResult<Vec<Value>> {
        let shard = match scope.shard {
            Some((name, shard)) if name == collection => Some(shard),
            _ => None,
        };
        Ok(self.store.documents(collection, shard)?)
    }

    /// Rows produced by node `id`
    fn run(&self, id: NodeId, scope: Scope<'_>) -> ExecutionResult<Vec<Bindings>> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::Singleton => return Ok(vec![scope.outer.clone()]),
            NodeKind::NoResults => return Ok(Vec::new()),
            NodeKind::Gather {
                collection,
                elements,
                sort_mode,
                shards,
            } => {
                let dependency = self.dependency(node)?;
                let mut streams = Vec::with_capacity(*shards);
                for shard in 0..*shards {
                    let shard_scope = Scope {
                        outer: scope.outer,
                        shard: Some((collection.as_str(), shard)),
                    };
                    streams.push(self.run(dependency, shard_scope)?);
                }
                // a region inside a subquery runs again for the next outer row
                {
                    let mut memo = self.coordinator_rows.borrow_mut();
                    for below in self.plan.execution_order(dependency) {
                        memo.remove(&below);
                    }
                }
                return Ok(merge_shards(streams, elements, *sort_mode));
            }
            NodeKind::Scatter { .. } => return self.coordinator(node, scope),
            NodeKind::Distribute { collection, keys } => {
                let rows = self.coordinator(node, scope)?;
                return match scope.shard {
                    Some((_, shard)) => self.distribute(node, rows, collection, keys, shard),
                    None => Ok(rows),
                };
            }
            _ => {}
        }

        let input = self.run(self.dependency(node)?, scope)?;
        match &node.kind {
            NodeKind::EnumerateCollection {
                collection,
                out_var,
                random,
            } => {
                let mut documents = self.documents(collection, scope)?;
                if *random {
                    fastrand::shuffle(&mut documents);
                }
                let mut rows = Vec::with_capacity(input.len() * documents.len());
                for row in input {
                    self.stats.borrow_mut().scanned_full += documents.len() as u64;
                    for document in &documents {
                        let mut next = row.clone();
                        next.insert(*out_var, document.clone());
                        rows.push(next);
                    }
                }
                Ok(rows)
            }
            NodeKind::Index {
                collection,
                out_var,
                lookups,
                fulltext,
                sort,
            } => {
                let documents = self.documents(collection, scope)?;
                let mut rows = Vec::new();
                for row in input {
                    let found = match fulltext {
                        Some(lookup) => self.fulltext_lookup(lookup, &row, documents.clone())?,
                        None => self.index_lookup(lookups, sort.as_ref(), *out_var, &row, &documents)?,
                    };
                    self.stats.borrow_mut().scanned_index += found.len() as u64;
                    for document in found {
                        let mut next = row.clone();
                        next.insert(*out_var, document);
                        rows.push(next);
                    }
                }
                Ok(rows)
            }
            NodeKind::EnumerateList { in_var, out_var } => {
                let mut rows = Vec::new();
                for row in input {
                    let items = match row.get(in_var) {
                        Some(Value::Array(items)) => items.clone(),
                        _ => Vec::new(),
                    };
                    for item in items {
                        let mut next = row.clone();
                        next.insert(*out_var, item);
                        rows.push(next);
                    }
                }
                Ok(rows)
            }
            NodeKind::Filter { in_var } => {
                let before = input.len();
                let rows: Vec<Bindings> = input
                    .into_iter()
                    .filter(|row| row.get(in_var).map(is_truthy).unwrap_or(false))
                    .collect();
                self.stats.borrow_mut().filtered += (before - rows.len()) as u64;
                Ok(rows)
            }
            NodeKind::Calculation {
                out_var,
                expression,
            } => {
                let evaluator = self.evaluator();
                input
                    .into_iter()
                    .map(|mut row| {
                        let value = evaluator.evaluate(expression, &row)?;
                        row.insert(*out_var, value);
                        Ok(row)
                    })
                    .collect()
            }
            NodeKind::Sort { elements } => Ok(sort_rows(input, elements)),
            NodeKind::Limit {
                offset,
                limit,
                full_count,
            } => {
                if *full_count {
                    *self.full_count.borrow_mut() = Some(input.len() as u64);
                }
                Ok(input
                    .into_iter()
                    .skip(*offset as usize)
                    .take(*limit as usize)
                    .collect())
            }
            NodeKind::Collect(spec) => Ok(self.collect(spec, input, scope)),
            NodeKind::Subquery { body, out_var } => {
                let body_node = self.node(*body)?;
                let NodeKind::Return { in_var } = &body_node.kind else {
                    return Err(ExecutionError::InvalidPlan(
                        body_node.id,
                        "subquery body does not end in a Return node".to_string(),
                    ));
                };
                let mut rows = Vec::with_capacity(input.len());
                for mut row in input {
                    let nested = Scope {
                        outer: &row,
                        shard: None,
                    };
                    let values: Vec<Value> = self
                        .run(*body, nested)?
                        .into_iter()
                        .map(|mut inner| inner.remove(in_var).unwrap_or(Value::Null))
                        .collect();
                    row.insert(*out_var, Value::Array(values));
                    rows.push(row);
                }
                Ok(rows)
            }
            NodeKind::Traversal(spec) => self.traverse(spec, input),
            NodeKind::Remote | NodeKind::Return { .. } => Ok(input),
            NodeKind::Singleton
            | NodeKind::NoResults
            | NodeKind::Gather { .. }
            | NodeKind::Scatter { .. }
            | NodeKind::Distribute { .. } => Err(ExecutionError::InvalidPlan(
                node.id,
                "unexpected node kind".to_string(),
            )),
        }
    }

    /// Input rows of a region, computed once outside of any shard
    fn coordinator(&self, node: &PlanNode, scope: Scope<'_>) -> ExecutionResult<Vec<Bindings>> {
        if let Some(rows) = self.coordinator_rows.borrow().get(&node.id) {
            return Ok(rows.clone());
        }
        let coordinator = Scope {
            outer: scope.outer,
            shard: None,
        };
        let rows = self.run(self.dependency(node)?, coordinator)?;
        self.coordinator_rows
            .borrow_mut()
            .insert(node.id, rows.clone());
        Ok(rows)
    }

    fn distribute(
        &self,
        node: &PlanNode,
        rows: Vec<Bindings>,
        collection: &str,
        keys: &[Expr],
        shard: usize,
    ) -> ExecutionResult<Vec<Bindings>> {
        let map = self.catalog.shard_map_for(collection).ok_or_else(|| {
            ExecutionError::InvalidPlan(node.id, format!("no shard layout for '{}'", collection))
        })?;
        let evaluator = self.evaluator();
        let mut routed = Vec::new();
        for row in rows {
            let values = keys
                .iter()
                .map(|key| evaluator.evaluate(key, &row))
                .collect::<ExecutionResult<Vec<_>>>()?;
            if map.responsible_shard(&values) == shard {
                routed.push(row);
            }
        }
        Ok(routed)
    }

    /// Documents matching any of the lookups, without duplicates
    fn index_lookup(
        &self,
        lookups: &[IndexLookup],
        sort: Option<&IndexSort>,
        out_var: VarId,
        row: &Bindings,
        documents: &[Value],
    ) -> ExecutionResult<Vec<Value>> {
        let evaluator = self.evaluator();
        let mut candidate = row.clone();
        let mut seen = BTreeSet::new();
        let mut found = Vec::new();

        for lookup in lookups {
            let conditions: Vec<Expr> = lookup
                .terms
                .iter()
                .map(|term| term.to_condition(out_var))
                .collect();
            for (position, document) in documents.iter().enumerate() {
                if seen.contains(&position) {
                    continue;
                }
                candidate.insert(out_var, document.clone());
                let mut matches = true;
                for condition in &conditions {
                    if !is_truthy(&evaluator.evaluate(condition, &candidate)?) {
                        matches = false;
                        break;
                    }
                }
                if matches {
                    seen.insert(position);
                    found.push(document.clone());
                }
            }
        }

        if let Some(order) = sort {
            let elements: Vec<SortElement> = order
                .paths
                .iter()
                .map(|path| SortElement {
                    var: out_var,
                    ascending: order.ascending,
                    path: path.clone(),
                })
                .collect();
            let mut keyed: Vec<(Vec<Value>, Value)> = found
                .into_iter()
                .map(|document| {
                    let mut bound = Bindings::new();
                    bound.insert(out_var, document);
                    let key = sort_key(&bound, &elements);
                    (key, bound.remove(&out_var).unwrap_or(Value::Null))
                })
                .collect();
            keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &elements));
            found = keyed.into_iter().map(|(_, document)| document).collect();
        }
        Ok(found)
    }

    fn fulltext_lookup(
        &self,
        lookup: &FulltextLookup,
        row: &Bindings,
        documents: Vec<Value>,
    ) -> ExecutionResult<Vec<Value>> {
        let evaluator = self.evaluator();
        let query = match evaluator.evaluate(&lookup.query, row)? {
            Value::String(query) => query,
            other => {
                return Err(ExecutionError::TypeError(format!(
                    "fulltext query must be a string, got {}",
                    other
                )))
            }
        };
        let limit = match &lookup.limit {
            Some(limit) => evaluator
                .evaluate(limit, row)?
                .as_u64()
                .map(|limit| limit as usize),
            None => None,
        };
        let field = lookup.index.fields.first().ok_or_else(|| {
            ExecutionError::FulltextError(format!("index {} has no field", lookup.index.name))
        })?;
        Ok(fulltext::search(
            documents,
            field,
            &FulltextQuery::parse(&query)?,
            lookup.index.min_length.unwrap_or(DEFAULT_MIN_WORD_LENGTH),
            limit,
        ))
    }

    /// Group rows; groups come out in ascending order of their keys
    fn collect(&self, spec: &CollectSpec, input: Vec<Bindings>, scope: Scope<'_>) -> Vec<Bindings> {
        let mut groups: BTreeMap<GroupKey, Vec<Bindings>> = BTreeMap::new();
        if spec.groups.is_empty() {
            // a single group, present even without input
            groups.insert(GroupKey(Vec::new()), input);
        } else {
            for row in input {
                let key = spec
                    .groups
                    .iter()
                    .map(|group| row.get(&group.in_var).cloned().unwrap_or(Value::Null))
                    .collect();
                groups.entry(GroupKey(key)).or_default().push(row);
            }
        }

        groups
            .into_iter()
            .map(|(GroupKey(key), members)| {
                let mut row = scope.outer.clone();
                for (group, value) in spec.groups.iter().zip(key) {
                    row.insert(group.out_var, value);
                }
                for aggregate_spec in &spec.aggregates {
                    let values: Vec<Value> = members
                        .iter()
                        .map(|member| {
                            member
                                .get(&aggregate_spec.in_var)
                                .cloned()
                                .unwrap_or(Value::Null)
                        })
                        .collect();
                    row.insert(
                        aggregate_spec.out_var,
                        aggregate(aggregate_spec.function, &values),
                    );
                }
                if let Some(into) = &spec.into {
                    let kept: Vec<Value> = members
                        .iter()
                        .map(|member| {
                            let object: Map<String, Value> = into
                                .kept
                                .iter()
                                .map(|(name, var)| {
                                    (name.clone(), member.get(var).cloned().unwrap_or(Value::Null))
                                })
                                .collect();
                            Value::Object(object)
                        })
                        .collect();
                    row.insert(into.out_var, Value::Array(kept));
                }
                if let Some(count) = spec.count_into {
                    row.insert(count, Value::from(members.len()));
                }
                row
            })
            .collect()
    }

    /// Depth-first traversal from each row's start vertex. Edges are unique
    /// per path.
    fn traverse(&self, spec: &TraversalSpec, input: Vec<Bindings>) -> ExecutionResult<Vec<Bindings>> {
        let edges = self.store.documents(&spec.edge_collection, None)?;
        let mut vertices = VertexCache::new(self.store);
        let mut rows = Vec::new();

        for row in input {
            let start_id = match row.get(&spec.start_var) {
                Some(Value::String(id)) => id.clone(),
                Some(document @ Value::Object(_)) => match get_field(document, "_id") {
                    Value::String(id) => id,
                    _ => continue,
                },
                _ => continue,
            };
            let start = vertices.get(&start_id)?;
            if start.is_null() {
                continue;
            }

            // (vertex id, path vertices, path edges)
            let mut stack = vec![(start_id, vec![start], Vec::<Value>::new())];
            while let Some((vertex_id, path_vertices, path_edges)) = stack.pop() {
                let depth = path_edges.len() as u64;
                if depth >= spec.min_depth {
                    let mut next = row.clone();
                    if let Some(vertex) = path_vertices.last() {
                        next.insert(spec.vertex_var, vertex.clone());
                    }
                    if let Some(edge_var) = spec.edge_var {
                        next.insert(edge_var, path_edges.last().cloned().unwrap_or(Value::Null));
                    }
                    if let Some(path_var) = spec.path_var {
                        next.insert(
                            path_var,
                            json!({ "vertices": path_vertices, "edges": path_edges }),
                        );
                    }
                    rows.push(next);
                }
                if depth >= spec.max_depth {
                    continue;
                }

                let mut expansions = Vec::new();
                for edge in &edges {
                    let Some(neighbor) = neighbor(edge, &vertex_id, spec.direction) else {
                        continue;
                    };
                    let edge_id = get_field(edge, "_id");
                    if path_edges
                        .iter()
                        .any(|used| compare_values(&get_field(used, "_id"), &edge_id) == Ordering::Equal)
                    {
                        continue;
                    }
                    let vertex = vertices.get(&neighbor)?;
                    let mut next_vertices = path_vertices.clone();
                    next_vertices.push(vertex);
                    let mut next_edges = path_edges.clone();
                    next_edges.push(edge.clone());
                    expansions.push((neighbor, next_vertices, next_edges));
                }
                // first edge is visited first
                stack.extend(expansions.into_iter().rev());
            }
        }
        Ok(rows)
    }
}

impl FulltextSource for PlanExecutor<'_> {
    fn fulltext(
        &self,
        collection: &str,
        attribute: &str,
        query: &str,
        limit: Option<usize>,
    ) -> ExecutionResult<Vec<Value>> {
        let index = self
            .catalog
            .indexes_for(collection)
            .into_iter()
            .find(|index| {
                index.index_type == IndexType::Fulltext
                    && index.fields.first().map(String::as_str) == Some(attribute)
            })
            .ok_or_else(|| {
                ExecutionError::FulltextError(format!(
                    "no fulltext index on {}.{}",
                    collection, attribute
                ))
            })?;
        let documents = self.store.documents(collection, None)?;
        Ok(fulltext::search(
            documents,
            attribute,
            &FulltextQuery::parse(query)?,
            index.min_length.unwrap_or(DEFAULT_MIN_WORD_LENGTH),
            limit,
        ))
    }
}

/// Group key ordered by AQL value order
#[derive(Debug, Clone)]
struct GroupKey(Vec<Value>);

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(
            &Value::Array(self.0.clone()),
            &Value::Array(other.0.clone()),
        )
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

fn neighbor(edge: &Value, vertex_id: &str, direction: EdgeDirection) -> Option<String> {
    let from = edge.get("_from").and_then(Value::as_str)?;
    let to = edge.get("_to").and_then(Value::as_str)?;
    match direction {
        EdgeDirection::Outbound if from == vertex_id => Some(to.to_string()),
        EdgeDirection::Inbound if to == vertex_id => Some(from.to_string()),
        EdgeDirection::Any if from == vertex_id => Some(to.to_string()),
        EdgeDirection::Any if to == vertex_id => Some(from.to_string()),
        _ => None,
    }
}

/// Vertex documents by `_id`, loaded per collection on first use.
/// Missing vertices resolve to null.
struct VertexCache<'a> {
    store: &'a dyn DocumentStore,
    collections: HashMap<String, HashMap<String, Value>>,
}

impl<'a> VertexCache<'a> {
    fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            collections: HashMap::new(),
        }
    }

    fn get(&mut self, id: &str) -> ExecutionResult<Value> {
        let Some((collection, key)) = id.split_once('/') else {
            return Ok(Value::Null);
        };
        if !self.collections.contains_key(collection) {
            let documents = self
                .store
                .documents(collection, None)
                .unwrap_or_default();
            let by_key = documents
                .into_iter()
                .filter_map(|document| match get_field(&document, "_key") {
                    Value::String(key) => Some((key, document)),
                    _ => None,
                })
                .collect();
            self.collections.insert(collection.to_string(), by_key);
        }
        Ok(self
            .collections
            .get(collection)
            .and_then(|documents| documents.get(key))
            .cloned()
            .unwrap_or(Value::Null))
    }
}
