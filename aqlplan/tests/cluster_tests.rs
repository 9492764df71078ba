//! Distribution of plans over shards: gather sort modes, sorted gather decay
//! and result equivalence with single-server execution

#[path = "testutils/mod.rs"]
mod testutils;

use aqlplan::plan::ExplainNode;
use aqlplan::ExplainOutput;
use serde_json::{json, Value};
use testutils::test_fixture::{
    indexed_catalog, node_types, nodes_of_type, sharded_catalog, sorted, TestFixture,
};

fn gather_of<'a>(explain: &'a ExplainOutput, collection: &str) -> &'a ExplainNode {
    nodes_of_type(explain, "GatherNode")
        .into_iter()
        .find(|node| node.param("collection") == Some(&json!(collection)))
        .unwrap_or_else(|| panic!("no gather for {}", collection))
}

fn sort_mode(node: &ExplainNode) -> &str {
    node.param("sortmode")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn element_count(node: &ExplainNode) -> usize {
    node.param("elements")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or_default()
}

#[test]
fn test_gather_sort_mode_follows_shard_count() {
    for (shards, expected) in [(3, "minelement"), (9, "heap")] {
        let fixture = TestFixture::cluster(sharded_catalog(shards, 30));
        let query = "FOR d IN sharded SORT d.value RETURN d.value";
        let explain = fixture.explain(query);
        let gather = gather_of(&explain, "sharded");
        assert_eq!(sort_mode(gather), expected, "{} shards", shards);
        assert_eq!(element_count(gather), 1);
        assert_eq!(gather.param("shards"), Some(&json!(shards)));
        assert!(explain
            .plan
            .rules
            .contains(&"distribute-sort-to-cluster".to_string()));

        let expected_rows: Vec<Value> = (1..=30).map(|i| json!(i)).collect();
        assert_eq!(fixture.rows(query), expected_rows, "{} shards", shards);
    }
}

#[test]
fn test_unsorted_gather() {
    let fixture = TestFixture::cluster(sharded_catalog(3, 30));
    let query = "FOR d IN sharded RETURN d.value";
    let explain = fixture.explain(query);
    let gather = gather_of(&explain, "sharded");
    assert_eq!(sort_mode(gather), "unset");
    assert_eq!(element_count(gather), 0);

    let expected: Vec<Value> = (1..=30).map(|i| json!(i)).collect();
    assert_eq!(sorted(fixture.rows(query)), sorted(expected));
}

#[test]
fn test_filters_move_to_shards() {
    let fixture = TestFixture::cluster(sharded_catalog(4, 30));
    let query = "FOR d IN sharded FILTER d.group == 1 RETURN d.value";
    let explain = fixture.explain(query);
    let types = node_types(&explain);
    let filter = types.iter().position(|t| t == "FilterNode").expect("filter");
    let remote = types.iter().rposition(|t| t == "RemoteNode").expect("remote");
    assert!(filter < remote, "{:?}", types);

    let expected: Vec<Value> = (1..=30).filter(|i| i % 3 == 1).map(|i| json!(i)).collect();
    assert_eq!(sorted(fixture.rows(query)), sorted(expected));
}

#[test]
fn test_sorted_gather_decays_when_resorted() {
    let fixture = TestFixture::cluster(sharded_catalog(3, 10));
    let single = TestFixture::single(sharded_catalog(3, 10));

    let query = "FOR a IN sharded SORT a.value FOR b IN single SORT b.name RETURN b.name";
    let explain = fixture.explain(query);
    let gather = gather_of(&explain, "sharded");
    assert_eq!(element_count(gather), 0);
    assert_eq!(sort_mode(gather), "unset");
    assert!(explain
        .plan
        .rules
        .contains(&"decay-unnecessary-sorted-gather".to_string()));
    let rows = fixture.rows(query);
    assert_eq!(rows.len(), 100);
    assert_eq!(rows, single.rows(query));

    for query in [
        "FOR b IN single SORT b.name FOR a IN sharded SORT a.value RETURN a.value",
        "FOR b IN single FILTER b.value > 2 SORT b.name \
         FOR a IN sharded FILTER a.group != 0 SORT a.value RETURN a.value",
    ] {
        let explain = fixture.explain(query);
        let gather = gather_of(&explain, "sharded");
        assert_eq!(element_count(gather), 1, "{}", query);
        assert_ne!(sort_mode(gather), "unset", "{}", query);
        assert!(
            !explain
                .plan
                .rules
                .contains(&"decay-unnecessary-sorted-gather".to_string()),
            "{}: {:?}",
            query,
            explain.plan.rules
        );
        // one shard stream needs no merge order
        let gather = gather_of(&explain, "single");
        assert_eq!(element_count(gather), 0, "{}", query);
        assert_eq!(sort_mode(gather), "unset", "{}", query);
        assert_eq!(fixture.rows(query), single.rows(query), "{}", query);
    }
}

/// Node types of the nested chain of the first Subquery node
fn subquery_types(explain: &ExplainOutput) -> Vec<String> {
    let subquery = nodes_of_type(explain, "SubqueryNode")
        .into_iter()
        .next()
        .expect("subquery");
    subquery
        .param("subquery")
        .and_then(|value| value["nodes"].as_array())
        .expect("nested nodes")
        .iter()
        .filter_map(|node| node["type"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn test_subquery_access_is_distributed() {
    let fixture = TestFixture::cluster(sharded_catalog(3, 30));
    let query = "FOR x IN (FOR d IN sharded RETURN d.value) RETURN x";
    let explain = fixture.explain(query);
    let types = subquery_types(&explain);
    let access = types
        .iter()
        .position(|t| t == "EnumerateCollectionNode")
        .expect("access");
    let gather = types.iter().position(|t| t == "GatherNode").expect("gather");
    assert!(access < gather, "{:?}", types);
    assert_eq!(types[gather - 1], "RemoteNode", "{:?}", types);
    assert!(explain.plan.rules.contains(&"scatter-in-cluster".to_string()));

    let expected: Vec<Value> = (1..=30).map(|i| json!(i)).collect();
    assert_eq!(sorted(fixture.rows(query)), sorted(expected));
}

#[test]
fn test_correlated_subquery_matches_single_server() {
    let cluster = TestFixture::cluster(sharded_catalog(4, 12));
    let single = TestFixture::single(sharded_catalog(4, 12));
    let query = "FOR b IN single FILTER b.value <= 3 \
                 LET s = (FOR a IN sharded FILTER a.group == b.value % 3 SORT a.value RETURN a.value) \
                 RETURN [b.value, s]";
    let types = subquery_types(&cluster.explain(query));
    assert!(types.contains(&"GatherNode".to_string()), "{:?}", types);
    let rows = cluster.rows(query);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], json!([1, [1, 4, 7, 10]]));
    assert_eq!(rows, single.rows(query));
}

#[test]
fn test_one_shard_plan_has_no_gather() {
    let fixture = TestFixture::cluster(indexed_catalog(1));
    let query = "FOR v IN values FILTER v.value == 2 SORT v.n RETURN v.n";
    let explain = fixture.explain(query);
    assert!(nodes_of_type(&explain, "GatherNode").is_empty());
    assert!(nodes_of_type(&explain, "ScatterNode").is_empty());
    assert!(explain.plan.rules.contains(&"cluster-one-shard".to_string()));

    let expected: Vec<Value> = (0..100).filter(|i| i % 10 == 2).map(|i| json!(i)).collect();
    assert_eq!(fixture.rows(query), expected);
}

#[test]
fn test_key_lookup_is_distributed() {
    let fixture = TestFixture::cluster(indexed_catalog(4));
    let query = "FOR v IN values FILTER v._key == 'k42' RETURN v.n";
    assert_eq!(fixture.rows(query), vec![json!(42)]);
}

#[test]
fn test_results_match_across_shard_counts() {
    let single = TestFixture::single(indexed_catalog(1));
    let queries = [
        "FOR v IN values SORT v.value DESC, v.n RETURN v.n",
        "FOR v IN values FILTER v.value == 7 SORT v.n DESC RETURN v.n",
        "FOR v IN values SORT v.n LIMIT 10, 5 RETURN v.n",
        "FOR v IN values FILTER v.n < 30 COLLECT g = v.value WITH COUNT INTO c RETURN [g, c]",
    ];
    for shards in [2, 3, 7] {
        let cluster = TestFixture::cluster(indexed_catalog(shards));
        for query in queries {
            assert_eq!(
                cluster.rows(query),
                single.rows(query),
                "{} with {} shards",
                query,
                shards
            );
        }
    }
}
