//! Test fixture for aqlplan integration tests
//!
//! Wraps a `QueryCoordinator` over a `MemoryCatalog` built for the test and
//! offers shortcuts for explaining and running queries.

#![allow(dead_code)]

use aqlplan::plan::ExplainNode;
use aqlplan::{
    CollectionDefinition, ExplainOutput, IndexDefinition, MemoryCatalog, OptimizerConfig,
    QueryCoordinator, QueryError, QueryOptions, QueryResult,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Test fixture with its own catalog
pub struct TestFixture {
    coordinator: Arc<QueryCoordinator>,
}

impl TestFixture {
    pub fn new(catalog: MemoryCatalog, config: OptimizerConfig) -> Self {
        Self {
            coordinator: Arc::new(QueryCoordinator::new(Arc::new(catalog), config)),
        }
    }

    /// Single-server fixture
    pub fn single(catalog: MemoryCatalog) -> Self {
        Self::new(catalog, OptimizerConfig::default())
    }

    /// Cluster fixture
    pub fn cluster(catalog: MemoryCatalog) -> Self {
        Self::new(catalog, OptimizerConfig::cluster())
    }

    pub fn coordinator(&self) -> Arc<QueryCoordinator> {
        self.coordinator.clone()
    }

    pub fn explain(&self, query: &str) -> ExplainOutput {
        self.explain_with(query, &[])
    }

    pub fn explain_with(&self, query: &str, rules: &[&str]) -> ExplainOutput {
        self.coordinator
            .explain(query, &QueryOptions::default().with_rules(rules))
            .unwrap_or_else(|e| panic!("explain failed for {}: {}", query, e))
    }

    pub fn try_query(&self, query: &str, options: &QueryOptions) -> Result<QueryResult, QueryError> {
        self.coordinator.query(query, options)
    }

    pub fn query(&self, query: &str) -> QueryResult {
        self.try_query(query, &QueryOptions::default())
            .unwrap_or_else(|e| panic!("query failed for {}: {}", query, e))
    }

    pub fn rows(&self, query: &str) -> Vec<Value> {
        self.query(query).rows
    }

    pub fn rows_with(&self, query: &str, rules: &[&str]) -> Vec<Value> {
        self.try_query(query, &QueryOptions::default().with_rules(rules))
            .unwrap_or_else(|e| panic!("query failed for {}: {}", query, e))
            .rows
    }
}

/// Node types of an explained plan, in execution order
pub fn node_types(output: &ExplainOutput) -> Vec<String> {
    output
        .plan
        .nodes
        .iter()
        .map(|node| node.node_type.clone())
        .collect()
}

pub fn nodes_of_type<'a>(output: &'a ExplainOutput, node_type: &'a str) -> Vec<&'a ExplainNode> {
    output.plan.nodes_of_type(node_type).collect()
}

/// Rows sorted by AQL-agnostic JSON text, for order independent comparison
pub fn sorted(mut rows: Vec<Value>) -> Vec<Value> {
    rows.sort_by_key(|row| row.to_string());
    rows
}

/// `docs` with fulltext indexes on `t1`, `t2` and `t3.e.x`. Documents 3 and
/// 6 contain both "möchten" and "müller" in every indexed attribute.
pub fn fulltext_catalog() -> MemoryCatalog {
    fulltext_catalog_with(&["t1", "t2", "t3.e.x"])
}

/// The fulltext documents with fulltext indexes on `attributes` only
pub fn fulltext_catalog_with(attributes: &[&str]) -> MemoryCatalog {
    let texts = [
        "wir möchten gehen",
        "Müller ist da",
        "Wir MÖCHTEN zum Müller",
        "nichts",
        "möchte müllerin",
        "müller, möchten sie?",
        "möchten-kaffee",
    ];
    let mut documents: Vec<Value> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            json!({
                "_key": (i + 1).to_string(),
                "t1": text,
                "t2": text,
                "t3": { "e": { "x": text } },
            })
        })
        .collect();
    documents.push(json!({ "_key": "8", "other": "möchten müller" }));

    let mut definition = CollectionDefinition::new("docs")
        .with_shards(3)
        .with_documents(documents);
    for attribute in attributes {
        definition = definition.with_index(IndexDefinition::fulltext(attribute, 2));
    }
    let catalog = MemoryCatalog::new();
    catalog.create_collection(definition).expect("create docs");
    catalog
}

/// `sharded` with the given shard count and a one-shard `single`
/// collection, both with `value` attributes 1..=count
pub fn sharded_catalog(shards: usize, count: usize) -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    catalog
        .create_collection(
            CollectionDefinition::new("sharded")
                .with_shards(shards)
                .with_documents(
                    (1..=count)
                        .map(|i| json!({ "value": i, "group": i % 3 }))
                        .collect(),
                ),
        )
        .expect("create sharded");
    catalog
        .create_collection(
            CollectionDefinition::new("single").with_documents(
                (1..=count)
                    .map(|i| json!({ "name": format!("n{:03}", i), "value": i }))
                    .collect(),
            ),
        )
        .expect("create single");
    catalog
}

/// `values` with 100 documents and a persistent index on `value`
pub fn indexed_catalog(shards: usize) -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    catalog
        .create_collection(
            CollectionDefinition::new("values")
                .with_shards(shards)
                .with_index(IndexDefinition::persistent(&["value"]))
                .with_documents(
                    (0..100)
                        .map(|i| json!({ "_key": format!("k{}", i), "value": i % 10, "n": i }))
                        .collect(),
                ),
        )
        .expect("create values");
    catalog
}
