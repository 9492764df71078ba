// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Merging of per-shard row streams at a Gather
//!
//! Shard streams arrive already sorted by the Gather's elements. The
//! min-element strategy scans every stream head for each output row, the
//! heap strategy keeps the heads in a binary heap. Both are stable: rows
//! with equal sort keys come out in shard order, and within a shard in
//! arrival order, so the two strategies produce identical output.

use crate::exec::eval::Bindings;
use crate::exec::value::{compare_values, get_path};
use crate::plan::node::{SortElement, SortMode};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Sort key of a row under `elements`
pub fn sort_key(row: &Bindings, elements: &[SortElement]) -> Vec<Value> {
    elements
        .iter()
        .map(|element| {
            row.get(&element.var)
                .map(|value| get_path(value, &element.path))
                .unwrap_or(Value::Null)
        })
        .collect()
}

/// Compare two sort keys, honoring each element's direction
pub fn compare_keys(left: &[Value], right: &[Value], elements: &[SortElement]) -> Ordering {
    for ((l, r), element) in left.iter().zip(right.iter()).zip(elements.iter()) {
        let ordering = compare_values(l, r);
        let ordering = if element.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable sort of rows by `elements`
pub fn sort_rows(rows: Vec<Bindings>, elements: &[SortElement]) -> Vec<Bindings> {
    let mut keyed: Vec<(Vec<Value>, Bindings)> = rows
        .into_iter()
        .map(|row| (sort_key(&row, elements), row))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, elements));
    keyed.into_iter().map(|(_, row)| row).collect()
}

/// Merge the shard streams of a Gather
pub fn merge_shards(
    shards: Vec<Vec<Bindings>>,
    elements: &[SortElement],
    mode: SortMode,
) -> Vec<Bindings> {
    if elements.is_empty() {
        return shards.into_iter().flatten().collect();
    }
    match mode {
        SortMode::Unset => shards.into_iter().flatten().collect(),
        SortMode::MinElement => merge_min_element(shards, elements),
        SortMode::Heap => merge_heap(shards, elements),
    }
}

fn keyed_streams(
    shards: Vec<Vec<Bindings>>,
    elements: &[SortElement],
) -> Vec<std::vec::IntoIter<(Vec<Value>, Bindings)>> {
    shards
        .into_iter()
        .map(|rows| {
            rows.into_iter()
                .map(|row| (sort_key(&row, elements), row))
                .collect::<Vec<_>>()
                .into_iter()
        })
        .collect()
}

fn merge_min_element(shards: Vec<Vec<Bindings>>, elements: &[SortElement]) -> Vec<Bindings> {
    let total = shards.iter().map(Vec::len).sum();
    let mut streams = keyed_streams(shards, elements);
    let mut heads: Vec<Option<(Vec<Value>, Bindings)>> =
        streams.iter_mut().map(Iterator::next).collect();
    let mut merged = Vec::with_capacity(total);

    loop {
        let mut best: Option<usize> = None;
        for (shard, head) in heads.iter().enumerate() {
            let Some((key, _)) = head else {
                continue;
            };
            let better = match best.and_then(|b| heads[b].as_ref()) {
                // strictly smaller only, earlier shards win ties
                Some((best_key, _)) => compare_keys(key, best_key, elements) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some(shard);
            }
        }
        let Some(shard) = best else {
            break;
        };
        if let Some((_, row)) = heads[shard].take() {
            merged.push(row);
        }
        heads[shard] = streams[shard].next();
    }
    merged
}

/// Stream head in the merge heap
struct HeapEntry<'e> {
    key: Vec<Value>,
    row: Bindings,
    shard: usize,
    elements: &'e [SortElement],
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, reverse for smallest key first
        compare_keys(&other.key, &self.key, self.elements).then(other.shard.cmp(&self.shard))
    }
}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

fn merge_heap(shards: Vec<Vec<Bindings>>, elements: &[SortElement]) -> Vec<Bindings> {
    let total = shards.iter().map(Vec::len).sum();
    let mut streams = keyed_streams(shards, elements);
    let mut heap = BinaryHeap::with_capacity(streams.len());
    for (shard, stream) in streams.iter_mut().enumerate() {
        if let Some((key, row)) = stream.next() {
            heap.push(HeapEntry {
                key,
                row,
                shard,
                elements,
            });
        }
    }

    let mut merged = Vec::with_capacity(total);
    while let Some(entry) = heap.pop() {
        let shard = entry.shard;
        merged.push(entry.row);
        if let Some((key, row)) = streams[shard].next() {
            heap.push(HeapEntry {
                key,
                row,
                shard,
                elements,
            });
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::expression::VarId;
    use serde_json::json;

    fn row(value: Value, tag: &str) -> Bindings {
        let mut row = Bindings::new();
        row.insert(VarId(0), value);
        row.insert(VarId(1), json!(tag));
        row
    }

    fn tags(rows: &[Bindings]) -> Vec<&str> {
        rows.iter()
            .map(|row| row[&VarId(1)].as_str().unwrap())
            .collect()
    }

    fn shards() -> Vec<Vec<Bindings>> {
        vec![
            vec![row(json!({"v": 1}), "a1"), row(json!({"v": 3}), "a3")],
            vec![row(json!({"v": 1}), "b1"), row(json!({"v": 2}), "b2")],
            vec![],
            vec![row(json!({"v": null}), "d0"), row(json!({"v": 3}), "d3")],
        ]
    }

    #[test]
    fn test_strategies_agree_and_are_stable() {
        let elements = vec![SortElement {
            var: VarId(0),
            ascending: true,
            path: vec!["v".to_string()],
        }];
        let min = merge_shards(shards(), &elements, SortMode::MinElement);
        let heap = merge_shards(shards(), &elements, SortMode::Heap);
        assert_eq!(tags(&min), vec!["d0", "a1", "b1", "b2", "a3", "d3"]);
        assert_eq!(min, heap);
    }

    #[test]
    fn test_unsorted_merge_concatenates() {
        let merged = merge_shards(shards(), &[], SortMode::Heap);
        assert_eq!(tags(&merged), vec!["a1", "a3", "b1", "b2", "d0", "d3"]);
    }

    #[test]
    fn test_descending_sort_is_stable() {
        let rows = vec![
            row(json!(1), "x"),
            row(json!(2), "y"),
            row(json!(1), "z"),
        ];
        let sorted = sort_rows(rows, &[SortElement::new(VarId(0), false)]);
        assert_eq!(tags(&sorted), vec!["y", "x", "z"]);
    }
}
