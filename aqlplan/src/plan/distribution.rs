// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shard topology helpers shared by the cluster rules

use crate::catalog::{Catalog, ShardMap};
use crate::plan::error::{PlanError, PlanResult};
use crate::plan::execution_plan::Plan;
use crate::plan::node::{SortElement, SortMode};

/// Merge strategy for a Gather over `shards` shard streams
pub fn sort_mode_for(elements: &[SortElement], shards: usize, heap_threshold: usize) -> SortMode {
    if elements.is_empty() {
        SortMode::Unset
    } else if shards < heap_threshold {
        SortMode::MinElement
    } else {
        SortMode::Heap
    }
}

/// Order a Gather merges its shard streams by; a single stream needs none
pub fn merge_order(elements: Vec<SortElement>, shards: usize) -> Vec<SortElement> {
    if shards <= 1 {
        Vec::new()
    } else {
        elements
    }
}

pub fn shard_map(catalog: &dyn Catalog, collection: &str) -> PlanResult<ShardMap> {
    catalog
        .shard_map_for(collection)
        .ok_or_else(|| PlanError::UnknownShardTopology(collection.to_string()))
}

/// Whether every collection the plan touches lives on a single shard
pub fn is_one_shard_plan(plan: &Plan, catalog: &dyn Catalog) -> PlanResult<bool> {
    for collection in plan.collections() {
        if !shard_map(catalog, &collection)?.is_single_shard() {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::expression::VarId;

    #[test]
    fn test_sort_mode_thresholds() {
        let elements = vec![SortElement::new(VarId(0), true)];
        assert_eq!(sort_mode_for(&elements, 3, 5), SortMode::MinElement);
        assert_eq!(sort_mode_for(&elements, 4, 5), SortMode::MinElement);
        assert_eq!(sort_mode_for(&elements, 5, 5), SortMode::Heap);
        assert_eq!(sort_mode_for(&elements, 9, 5), SortMode::Heap);
        assert_eq!(sort_mode_for(&[], 9, 5), SortMode::Unset);
    }

    #[test]
    fn test_single_stream_has_no_merge_order() {
        let elements = vec![SortElement::new(VarId(0), true)];
        assert!(merge_order(elements.clone(), 1).is_empty());
        assert_eq!(merge_order(elements.clone(), 2), elements);
    }
}
