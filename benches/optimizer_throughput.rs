/// Benchmark for optimizer and executor throughput
///
/// Measures how many queries per second the coordinator can plan, and how
/// many it can plan and run, on single-server and cluster configurations.

use aqlplan::{
    CollectionDefinition, IndexDefinition, MemoryCatalog, OptimizerConfig, QueryCoordinator,
    QueryOptions,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

const QUERIES: [&str; 5] = [
    "FOR d IN docs FILTER d.value == 7 RETURN d.n",
    "FOR d IN docs FILTER d.value IN [1, 2, 3] && d.n > 500 SORT d.n LIMIT 10 RETURN d",
    "FOR d IN docs COLLECT v = d.value WITH COUNT INTO c RETURN [v, c]",
    "FOR a IN docs FILTER a.value == 1 FOR b IN small FILTER b.value == a.n RETURN [a.n, b.n]",
    "FOR d IN docs SORT d.n DESC LIMIT 5 RETURN d.n",
];

fn catalog(shards: usize) -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    catalog
        .create_collection(
            CollectionDefinition::new("docs")
                .with_shards(shards)
                .with_index(IndexDefinition::persistent(&["value"]))
                .with_documents(
                    (0..2000)
                        .map(|i| json!({ "value": i % 50, "n": i }))
                        .collect(),
                ),
        )
        .expect("create docs");
    catalog
        .create_collection(
            CollectionDefinition::new("small")
                .with_index(IndexDefinition::persistent(&["value"]))
                .with_documents((0..100).map(|i| json!({ "value": i, "n": i })).collect()),
        )
        .expect("create small");
    catalog
}

fn run(name: &str, coordinator: &QueryCoordinator, iterations: usize, execute: bool) {
    let options = QueryOptions::default();
    let start = Instant::now();
    let mut rows = 0;
    for _ in 0..iterations {
        for query in QUERIES {
            if execute {
                rows += coordinator
                    .query(query, &options)
                    .map(|result| result.len())
                    .unwrap_or(0);
            } else {
                coordinator.plan(query, &options).ok();
            }
        }
    }
    let duration = start.elapsed();
    let total = iterations * QUERIES.len();
    println!("📊 {}", name);
    println!("  Queries: {}", total);
    println!("  Time: {:?}", duration);
    println!(
        "  Throughput: {:.0} queries/sec",
        total as f64 / duration.as_secs_f64()
    );
    if execute {
        println!("  Rows: {}", rows);
    }
    println!();
}

fn main() {
    println!("=== Optimizer Throughput Benchmark ===\n");

    let single = QueryCoordinator::new(Arc::new(catalog(1)), OptimizerConfig::default());
    let cluster = QueryCoordinator::new(Arc::new(catalog(5)), OptimizerConfig::cluster());

    run("Planning, single server", &single, 200, false);
    run("Planning, cluster with 5 shards", &cluster, 200, false);
    run("Planning and execution, single server", &single, 20, true);
    run("Planning and execution, cluster with 5 shards", &cluster, 20, true);

    println!("✅ Benchmark complete");
}
