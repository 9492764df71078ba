// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Collection catalog: index descriptors, shard maps and document storage
//!
//! The optimizer consumes the catalog through the [`Catalog`] trait only.
//! [`MemoryCatalog`] is the in-memory implementation used by the CLI and the
//! test suite; it hash-shards documents with the same function the
//! distribution planner uses for shard pruning.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{CatalogError, CatalogResult};
pub use memory::{CollectionDefinition, CollectionType, IndexDefinition, MemoryCatalog};
pub use traits::{Catalog, DocumentStore};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Index kinds known to the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    Primary,
    Edge,
    Persistent,
    Fulltext,
    Geo,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Primary => "primary",
            IndexType::Edge => "edge",
            IndexType::Persistent => "persistent",
            IndexType::Fulltext => "fulltext",
            IndexType::Geo => "geo",
        }
    }
}

/// Snapshot of an index as seen by the optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
    /// Attribute paths, dot separated for nested attributes (`t3.e.x`)
    pub fields: Vec<String>,
    pub unique: bool,
    pub sparse: bool,
    /// Fraction of distinct values in [0, 1]
    pub selectivity_estimate: f64,
    /// Minimum indexed word length, fulltext indexes only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
}

impl IndexDescriptor {
    /// Field paths split into attribute names
    pub fn field_paths(&self) -> Vec<Vec<String>> {
        self.fields
            .iter()
            .map(|field| field.split('.').map(str::to_string).collect())
            .collect()
    }
}

/// Location of one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub id: String,
    pub server: String,
}

/// Shard layout of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardMap {
    pub collection: String,
    pub shards: Vec<ShardInfo>,
    /// Satellite collections are replicated to every server
    pub satellite: bool,
    pub shard_keys: Vec<String>,
}

impl ShardMap {
    pub fn number_of_shards(&self) -> usize {
        self.shards.len()
    }

    /// Collections that behave like a single shard for reads
    pub fn is_single_shard(&self) -> bool {
        self.satellite || self.shards.len() <= 1
    }

    /// Shard responsible for a document with these shard key values
    pub fn responsible_shard(&self, key_values: &[Value]) -> usize {
        shard_for_values(key_values, self.shards.len())
    }
}

/// Hash shard key values onto `shard_count` shards
pub fn shard_for_values(key_values: &[Value], shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    let mut hasher = crc32fast::Hasher::new();
    for value in key_values {
        hasher.update(value.to_string().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize() as usize % shard_count
}
