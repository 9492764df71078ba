// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Explain output
//!
//! Serializable report of an optimized plan: every node with its type, id,
//! dependencies, estimates and node-specific parameters, plus the applied
//! rules, accessed collections and variables. Keys are camelCase.
//!
//! ```json
//! { "type": "GatherNode", "id": 7, "dependencies": [6], "estimatedCost": 41.0,
//!   "estimatedNrItems": 12, "sortmode": "minelement", "elements": [...] }
//! ```

use crate::plan::execution_plan::Plan;
use crate::plan::expression::{VarId, VariableTable};
use crate::plan::node::{IndexLookup, NodeId, NodeKind, SortElement};
use crate::plan::optimizer::OptimizerStats;
use serde::Serialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainNode {
    #[serde(rename = "type")]
    pub node_type: String,
    pub id: NodeId,
    pub dependencies: Vec<NodeId>,
    pub estimated_cost: f64,
    pub estimated_nr_items: u64,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ExplainNode {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainCollection {
    pub name: String,
    #[serde(rename = "type")]
    pub access: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainVariable {
    pub id: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainPlan {
    pub nodes: Vec<ExplainNode>,
    pub rules: Vec<String>,
    pub collections: Vec<ExplainCollection>,
    pub variables: Vec<ExplainVariable>,
    pub estimated_cost: f64,
    pub estimated_nr_items: u64,
}

impl ExplainPlan {
    pub fn new(plan: &Plan) -> Self {
        let estimate = plan.root_estimate();
        Self {
            nodes: explain_chain(plan, plan.root()),
            rules: plan.applied_rules().iter().map(|r| r.to_string()).collect(),
            collections: plan
                .collections()
                .into_iter()
                .map(|name| ExplainCollection {
                    name,
                    access: "read".to_string(),
                })
                .collect(),
            variables: plan
                .variables()
                .iter()
                .map(|(id, name)| ExplainVariable {
                    id: id.0,
                    name: name.to_string(),
                })
                .collect(),
            estimated_cost: estimate.map(|e| e.estimated_cost).unwrap_or(0.0),
            estimated_nr_items: estimate.map(|e| e.estimated_nr_items).unwrap_or(0),
        }
    }

    /// Top-level nodes of a type, in execution order
    pub fn nodes_of_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a ExplainNode> {
        self.nodes
            .iter()
            .filter(move |node| node.node_type == node_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainOutput {
    pub plan: ExplainPlan,
    pub stats: OptimizerStats,
    pub warnings: Vec<String>,
}

impl ExplainOutput {
    pub fn new(plan: &Plan, stats: OptimizerStats, warnings: Vec<String>) -> Self {
        Self {
            plan: ExplainPlan::new(plan),
            stats,
            warnings,
        }
    }
}

fn explain_chain(plan: &Plan, top: NodeId) -> Vec<ExplainNode> {
    plan.execution_order(top)
        .into_iter()
        .filter_map(|id| plan.node(id))
        .map(|node| {
            let estimate = node.estimate.unwrap_or_default();
            ExplainNode {
                node_type: node.type_name().to_string(),
                id: node.id,
                dependencies: node.dependencies.clone(),
                estimated_cost: estimate.estimated_cost,
                estimated_nr_items: estimate.estimated_nr_items,
                params: node_params(plan, &node.kind),
            }
        })
        .collect()
}

fn variable(vars: &VariableTable, id: VarId) -> Value {
    json!({ "id": id.0, "name": vars.name(id) })
}

fn sort_elements(vars: &VariableTable, elements: &[SortElement]) -> Value {
    Value::Array(
        elements
            .iter()
            .map(|element| {
                json!({
                    "inVariable": variable(vars, element.var),
                    "ascending": element.ascending,
                    "path": element.path,
                })
            })
            .collect(),
    )
}

fn index_entries(lookups: &[IndexLookup], vars: &VariableTable, out_var: VarId) -> Value {
    Value::Array(
        lookups
            .iter()
            .map(|lookup| {
                let condition: Vec<String> = lookup
                    .terms
                    .iter()
                    .map(|term| term.to_condition(out_var).render(vars))
                    .collect();
                json!({
                    "id": lookup.index.id,
                    "name": lookup.index.name,
                    "type": lookup.index.index_type.as_str(),
                    "fields": lookup.index.fields,
                    "unique": lookup.index.unique,
                    "sparse": lookup.index.sparse,
                    "selectivityEstimate": lookup.index.selectivity_estimate,
                    "condition": condition.join(" && "),
                })
            })
            .collect(),
    )
}

fn node_params(plan: &Plan, kind: &NodeKind) -> Map<String, Value> {
    let vars = plan.variables();
    let params = match kind {
        NodeKind::Singleton | NodeKind::Remote | NodeKind::NoResults => json!({}),
        NodeKind::EnumerateCollection {
            collection,
            out_var,
            random,
        } => json!({
            "collection": collection,
            "outVariable": variable(vars, *out_var),
            "random": random,
        }),
        NodeKind::EnumerateList { in_var, out_var } => json!({
            "inVariable": variable(vars, *in_var),
            "outVariable": variable(vars, *out_var),
        }),
        NodeKind::Index {
            collection,
            out_var,
            lookups,
            fulltext,
            sort,
        } => {
            let indexes = match fulltext {
                Some(lookup) => json!([{
                    "id": lookup.index.id,
                    "name": lookup.index.name,
                    "type": lookup.index.index_type.as_str(),
                    "fields": lookup.index.fields,
                    "query": lookup.query.render(vars),
                }]),
                None => index_entries(lookups, vars, *out_var),
            };
            json!({
                "collection": collection,
                "outVariable": variable(vars, *out_var),
                "indexes": indexes,
                "sorted": sort.is_some(),
                "ascending": sort.as_ref().map(|s| s.ascending).unwrap_or(true),
            })
        }
        NodeKind::Filter { in_var } | NodeKind::Return { in_var } => json!({
            "inVariable": variable(vars, *in_var),
        }),
        NodeKind::Calculation {
            out_var,
            expression,
        } => json!({
            "outVariable": variable(vars, *out_var),
            "expression": expression.render(vars),
            "canThrow": false,
            "deterministic": expression.is_deterministic(),
        }),
        NodeKind::Sort { elements } => json!({
            "elements": sort_elements(vars, elements),
        }),
        NodeKind::Limit {
            offset,
            limit,
            full_count,
        } => json!({
            "offset": offset,
            "limit": limit,
            "fullCount": full_count,
        }),
        NodeKind::Collect(spec) => json!({
            "groups": spec.groups.iter().map(|group| json!({
                "outVariable": variable(vars, group.out_var),
                "inVariable": variable(vars, group.in_var),
            })).collect::<Vec<_>>(),
            "aggregates": spec.aggregates.iter().map(|aggregate| json!({
                "outVariable": variable(vars, aggregate.out_var),
                "inVariable": variable(vars, aggregate.in_var),
                "type": aggregate.function.as_str(),
            })).collect::<Vec<_>>(),
            "outVariable": spec.into.as_ref().map(|into| variable(vars, into.out_var)),
            "keepVariables": spec.into.as_ref().map(|into| {
                into.kept.iter().map(|(_, var)| variable(vars, *var)).collect::<Vec<_>>()
            }),
            "count": spec.count_into.map(|var| variable(vars, var)),
        }),
        NodeKind::Subquery { body, out_var } => json!({
            "outVariable": variable(vars, *out_var),
            "subquery": { "nodes": explain_chain(plan, *body) },
        }),
        NodeKind::Traversal(spec) => json!({
            "edgeCollection": spec.edge_collection,
            "direction": format!("{:?}", spec.direction).to_uppercase(),
            "minDepth": spec.min_depth,
            "maxDepth": spec.max_depth,
            "inVariable": variable(vars, spec.start_var),
            "vertexOutVariable": variable(vars, spec.vertex_var),
            "edgeOutVariable": spec.edge_var.map(|var| variable(vars, var)),
            "pathOutVariable": spec.path_var.map(|var| variable(vars, var)),
        }),
        NodeKind::Gather {
            collection,
            elements,
            sort_mode,
            shards,
        } => json!({
            "collection": collection,
            "elements": sort_elements(vars, elements),
            "sortmode": sort_mode.as_str(),
            "shards": shards,
        }),
        NodeKind::Scatter { collection } => json!({ "collection": collection }),
        NodeKind::Distribute { collection, keys } => json!({
            "collection": collection,
            "keys": keys.iter().map(|key| key.render(vars)).collect::<Vec<_>>(),
        }),
    };
    match params {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_query;
    use crate::catalog::{CollectionDefinition, MemoryCatalog};
    use crate::plan::builder::build_plan;
    use crate::plan::cost::CostModel;

    #[test]
    fn test_explain_limit_and_subquery() {
        let catalog = MemoryCatalog::new();
        catalog
            .create_collection(CollectionDefinition::new("docs"))
            .unwrap();
        let query = parse_query(
            "FOR d IN docs LET n = (FOR x IN [1, 2] RETURN x) LIMIT 1, 2 RETURN n",
        )
        .unwrap();
        let mut plan = build_plan(&query, &catalog, true).unwrap();
        plan.estimate_costs(&CostModel::new(), &catalog).unwrap();

        let output = ExplainOutput::new(&plan, OptimizerStats::default(), Vec::new());
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["plan"]["collections"][0]["name"], "docs");
        assert_eq!(value["stats"]["rulesExecuted"], 0);

        let nodes = &output.plan.nodes;
        assert_eq!(nodes[0].node_type, "SingletonNode");
        assert_eq!(nodes.last().unwrap().node_type, "ReturnNode");

        let limit = output.plan.nodes_of_type("LimitNode").next().unwrap();
        assert_eq!(limit.param("offset"), Some(&json!(1)));
        assert_eq!(limit.param("limit"), Some(&json!(2)));
        assert_eq!(limit.param("fullCount"), Some(&json!(true)));

        let subquery = output.plan.nodes_of_type("SubqueryNode").next().unwrap();
        let inner = subquery.param("subquery").unwrap()["nodes"]
            .as_array()
            .unwrap();
        assert_eq!(inner.first().unwrap()["type"], "SingletonNode");
        assert_eq!(inner.last().unwrap()["type"], "ReturnNode");

        let serialized = serde_json::to_value(limit).unwrap();
        assert_eq!(serialized["type"], "LimitNode");
        assert!(serialized["estimatedCost"].as_f64().unwrap() > 0.0);
    }
}
