// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Collaborator traits consumed by the optimizer and the executor
//!
//! The optimizer only reads snapshots through [`Catalog`]: index descriptors,
//! document count estimates and shard maps. It never performs I/O during rule
//! application. The reference executor reads documents through
//! [`DocumentStore`], one shard at a time.

use super::error::CatalogResult;
use super::{IndexDescriptor, ShardMap};
use serde_json::Value;

/// Read-only collection and index metadata
pub trait Catalog: Send + Sync {
    /// Whether a collection with this name exists
    fn has_collection(&self, collection: &str) -> bool;

    /// Index descriptors declared on a collection, in declaration order.
    /// Unknown collections have no indexes.
    fn indexes_for(&self, collection: &str) -> Vec<IndexDescriptor>;

    /// Estimated number of documents, `None` for unknown collections
    fn document_count_estimate(&self, collection: &str) -> Option<u64>;

    /// Shard layout of a collection, `None` when the topology is unknown
    fn shard_map_for(&self, collection: &str) -> Option<ShardMap>;
}

/// Document access for plan execution
pub trait DocumentStore: Send + Sync {
    /// Documents of one shard (`Some(shard)`) or of the whole collection
    /// (`None`), in storage order
    fn documents(&self, collection: &str, shard: Option<usize>) -> CatalogResult<Vec<Value>>;
}
