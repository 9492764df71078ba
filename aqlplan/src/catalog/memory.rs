// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory, hash-sharded catalog
//!
//! Collections are declared with a shard count, shard keys and secondary
//! indexes. Every collection gets an implicit primary index on `_key`; edge
//! collections also get an implicit edge index on `_from`/`_to`. Index
//! selectivity estimates are computed from the stored documents unless the
//! definition pins them.

use super::error::{CatalogError, CatalogResult};
use super::traits::{Catalog, DocumentStore};
use super::{shard_for_values, IndexDescriptor, IndexType, ShardInfo, ShardMap};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Document or edge collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    #[default]
    Document,
    Edge,
}

/// Secondary index declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub fields: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    /// Pinned selectivity; computed from the data when absent
    #[serde(default)]
    pub selectivity_estimate: Option<f64>,
    #[serde(default)]
    pub min_length: Option<usize>,
}

impl IndexDefinition {
    pub fn persistent(fields: &[&str]) -> Self {
        Self::new(IndexType::Persistent, fields)
    }

    pub fn fulltext(field: &str, min_length: usize) -> Self {
        let mut definition = Self::new(IndexType::Fulltext, &[field]);
        definition.min_length = Some(min_length);
        definition.sparse = true;
        definition
    }

    pub fn new(index_type: IndexType, fields: &[&str]) -> Self {
        Self {
            index_type,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            name: None,
            unique: false,
            sparse: false,
            selectivity_estimate: None,
            min_length: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }
}

fn default_number_of_shards() -> usize {
    1
}

fn default_shard_keys() -> Vec<String> {
    vec!["_key".to_string()]
}

/// Collection declaration, as found in catalog JSON files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub name: String,
    #[serde(default, rename = "type")]
    pub collection_type: CollectionType,
    #[serde(default = "default_number_of_shards")]
    pub number_of_shards: usize,
    #[serde(default = "default_shard_keys")]
    pub shard_keys: Vec<String>,
    #[serde(default)]
    pub satellite: bool,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default)]
    pub documents: Vec<Value>,
}

impl CollectionDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collection_type: CollectionType::Document,
            number_of_shards: default_number_of_shards(),
            shard_keys: default_shard_keys(),
            satellite: false,
            indexes: Vec::new(),
            documents: Vec::new(),
        }
    }

    pub fn edge(name: &str) -> Self {
        let mut definition = Self::new(name);
        definition.collection_type = CollectionType::Edge;
        definition
    }

    pub fn with_shards(mut self, number_of_shards: usize) -> Self {
        self.number_of_shards = number_of_shards;
        self
    }

    pub fn satellite(mut self) -> Self {
        self.satellite = true;
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_documents(mut self, documents: Vec<Value>) -> Self {
        self.documents.extend(documents);
        self
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    collections: Vec<CollectionDefinition>,
}

#[derive(Debug)]
struct CollectionData {
    definition: CollectionDefinition,
    shards: Vec<Vec<Value>>,
    keys: HashSet<String>,
    next_key: u64,
}

impl CollectionData {
    fn document_count(&self) -> usize {
        self.shards.iter().map(Vec::len).sum()
    }

    fn all_documents(&self) -> impl Iterator<Item = &Value> {
        self.shards.iter().flatten()
    }

    fn shard_map(&self) -> ShardMap {
        let name = &self.definition.name;
        ShardMap {
            collection: name.clone(),
            shards: (0..self.shards.len())
                .map(|i| ShardInfo {
                    id: format!("s{}_{}", name, i + 1),
                    server: format!("DBServer{:04}", i + 1),
                })
                .collect(),
            satellite: self.definition.satellite,
            shard_keys: self.definition.shard_keys.clone(),
        }
    }

    fn descriptors(&self) -> Vec<IndexDescriptor> {
        let name = &self.definition.name;
        let mut descriptors = vec![IndexDescriptor {
            id: format!("{}/0", name),
            name: "primary".to_string(),
            index_type: IndexType::Primary,
            fields: vec!["_key".to_string()],
            unique: true,
            sparse: false,
            selectivity_estimate: self.unique_selectivity(),
            min_length: None,
        }];

        if self.definition.collection_type == CollectionType::Edge {
            descriptors.push(IndexDescriptor {
                id: format!("{}/1", name),
                name: "edge".to_string(),
                index_type: IndexType::Edge,
                fields: vec!["_from".to_string(), "_to".to_string()],
                unique: false,
                sparse: false,
                selectivity_estimate: self.computed_selectivity(&["_from".to_string()], false),
                min_length: None,
            });
        }

        for definition in &self.definition.indexes {
            let position = descriptors.len();
            let selectivity = match definition.selectivity_estimate {
                Some(pinned) => pinned.clamp(0.0, 1.0),
                None if definition.unique => self.unique_selectivity(),
                None if definition.index_type == IndexType::Persistent => {
                    self.computed_selectivity(&definition.fields, definition.sparse)
                }
                None => 1.0,
            };
            descriptors.push(IndexDescriptor {
                id: format!("{}/{}", name, position),
                name: definition
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("idx_{}", position)),
                index_type: definition.index_type,
                fields: definition.fields.clone(),
                unique: definition.unique,
                sparse: definition.sparse,
                selectivity_estimate: selectivity,
                min_length: definition.min_length,
            });
        }

        descriptors
    }

    /// Fraction of the indexed documents matching one lookup of an
    /// existing value combination
    fn computed_selectivity(&self, fields: &[String], sparse: bool) -> f64 {
        let mut distinct = HashSet::new();
        let mut total = 0usize;
        for document in self.all_documents() {
            let values: Vec<Value> = fields
                .iter()
                .map(|field| attribute_value(document, field))
                .collect();
            if sparse && values.iter().any(Value::is_null) {
                continue;
            }
            total += 1;
            distinct.insert(Value::Array(values).to_string());
        }
        if total == 0 {
            1.0
        } else {
            1.0 / distinct.len() as f64
        }
    }

    fn unique_selectivity(&self) -> f64 {
        1.0 / self.document_count().max(1) as f64
    }
}

fn attribute_value(document: &Value, field: &str) -> Value {
    field
        .split('.')
        .try_fold(document, |value, key| value.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

/// In-memory catalog and document store
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    collections: RwLock<BTreeMap<String, CollectionData>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load collections, indexes and documents from a JSON catalog file body
    pub fn from_json_str(json: &str) -> CatalogResult<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let catalog = Self::new();
        for definition in file.collections {
            catalog.create_collection(definition)?;
        }
        Ok(catalog)
    }

    pub fn from_file(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Create a collection and insert its initial documents
    pub fn create_collection(&self, definition: CollectionDefinition) -> CatalogResult<()> {
        if definition.name.is_empty() {
            return Err(CatalogError::InvalidDefinition(
                "collection name must not be empty".to_string(),
            ));
        }
        if definition.number_of_shards == 0 {
            return Err(CatalogError::InvalidDefinition(format!(
                "collection '{}' needs at least one shard",
                definition.name
            )));
        }
        if definition.shard_keys.is_empty() {
            return Err(CatalogError::InvalidDefinition(format!(
                "collection '{}' needs at least one shard key",
                definition.name
            )));
        }
        for index in &definition.indexes {
            validate_index(&definition.name, index)?;
        }

        let mut definition = definition;
        let documents = std::mem::take(&mut definition.documents);
        let shard_count = if definition.satellite {
            1
        } else {
            definition.number_of_shards
        };
        definition.number_of_shards = shard_count;

        let name = definition.name.clone();
        {
            let mut collections = self.collections.write();
            if collections.contains_key(&name) {
                return Err(CatalogError::DuplicateCollection(name));
            }
            collections.insert(
                name.clone(),
                CollectionData {
                    definition,
                    shards: vec![Vec::new(); shard_count],
                    keys: HashSet::new(),
                    next_key: 1,
                },
            );
        }

        debug!(
            "Created collection '{}' with {} shard(s)",
            name, shard_count
        );

        for document in documents {
            self.insert(&name, document)?;
        }
        Ok(())
    }

    /// Declare an additional index on an existing collection
    pub fn ensure_index(
        &self,
        collection: &str,
        index: IndexDefinition,
    ) -> CatalogResult<IndexDescriptor> {
        validate_index(collection, &index)?;
        let mut collections = self.collections.write();
        let data = collections
            .get_mut(collection)
            .ok_or_else(|| CatalogError::CollectionNotFound(collection.to_string()))?;
        data.definition.indexes.push(index);
        data.descriptors()
            .pop()
            .ok_or_else(|| CatalogError::InvalidDefinition("index was not registered".to_string()))
    }

    /// Insert one document, assigning `_key` and `_id`; returns the key
    pub fn insert(&self, collection: &str, document: Value) -> CatalogResult<String> {
        let mut collections = self.collections.write();
        let data = collections
            .get_mut(collection)
            .ok_or_else(|| CatalogError::CollectionNotFound(collection.to_string()))?;

        let mut object: Map<String, Value> = match document {
            Value::Object(object) => object,
            other => {
                return Err(CatalogError::InvalidDocument(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };

        let key = match object.get("_key") {
            Some(Value::String(key)) => key.clone(),
            Some(Value::Number(number)) => number.to_string(),
            Some(other) => {
                return Err(CatalogError::InvalidDocument(format!(
                    "invalid _key {}",
                    other
                )))
            }
            None => {
                while data.keys.contains(&data.next_key.to_string()) {
                    data.next_key += 1;
                }
                data.next_key.to_string()
            }
        };
        if data.keys.contains(&key) {
            return Err(CatalogError::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }

        if data.definition.collection_type == CollectionType::Edge {
            for attribute in ["_from", "_to"] {
                if !matches!(object.get(attribute), Some(Value::String(_))) {
                    return Err(CatalogError::InvalidDocument(format!(
                        "edge documents need a string {} attribute",
                        attribute
                    )));
                }
            }
        }

        object.insert("_key".to_string(), Value::String(key.clone()));
        object.insert(
            "_id".to_string(),
            Value::String(format!("{}/{}", collection, key)),
        );
        let document = Value::Object(object);

        let key_values: Vec<Value> = data
            .definition
            .shard_keys
            .iter()
            .map(|field| attribute_value(&document, field))
            .collect();
        let shard = shard_for_values(&key_values, data.shards.len());
        data.shards[shard].push(document);
        data.keys.insert(key.clone());
        Ok(key)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Declarations of all collections, without documents
    pub fn definitions(&self) -> Vec<CollectionDefinition> {
        self.collections
            .read()
            .values()
            .map(|data| data.definition.clone())
            .collect()
    }

    /// Number of documents stored in each shard
    pub fn shard_sizes(&self, collection: &str) -> Option<Vec<usize>> {
        self.collections
            .read()
            .get(collection)
            .map(|data| data.shards.iter().map(Vec::len).collect())
    }
}

fn validate_index(collection: &str, index: &IndexDefinition) -> CatalogResult<()> {
    if matches!(index.index_type, IndexType::Primary | IndexType::Edge) {
        return Err(CatalogError::InvalidDefinition(format!(
            "{} indexes are created implicitly on '{}'",
            index.index_type.as_str(),
            collection
        )));
    }
    if index.fields.is_empty() {
        return Err(CatalogError::InvalidDefinition(format!(
            "index on '{}' needs at least one field",
            collection
        )));
    }
    if index.index_type == IndexType::Fulltext && index.fields.len() != 1 {
        return Err(CatalogError::InvalidDefinition(format!(
            "fulltext index on '{}' must cover exactly one attribute",
            collection
        )));
    }
    Ok(())
}

impl Catalog for MemoryCatalog {
    fn has_collection(&self, collection: &str) -> bool {
        self.collections.read().contains_key(collection)
    }

    fn indexes_for(&self, collection: &str) -> Vec<IndexDescriptor> {
        self.collections
            .read()
            .get(collection)
            .map(CollectionData::descriptors)
            .unwrap_or_default()
    }

    fn document_count_estimate(&self, collection: &str) -> Option<u64> {
        self.collections
            .read()
            .get(collection)
            .map(|data| data.document_count() as u64)
    }

    fn shard_map_for(&self, collection: &str) -> Option<ShardMap> {
        self.collections
            .read()
            .get(collection)
            .map(CollectionData::shard_map)
    }
}

impl DocumentStore for MemoryCatalog {
    fn documents(&self, collection: &str, shard: Option<usize>) -> CatalogResult<Vec<Value>> {
        let collections = self.collections.read();
        let data = collections
            .get(collection)
            .ok_or_else(|| CatalogError::CollectionNotFound(collection.to_string()))?;
        match shard {
            Some(shard) => Ok(data.shards.get(shard).cloned().unwrap_or_default()),
            None => Ok(data.all_documents().cloned().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbered(count: usize) -> Vec<Value> {
        (1..=count)
            .map(|i| json!({ "_key": i.to_string(), "value": i % 4 }))
            .collect()
    }

    #[test]
    fn test_documents_are_spread_over_shards() {
        let catalog = MemoryCatalog::new();
        catalog
            .create_collection(
                CollectionDefinition::new("docs")
                    .with_shards(3)
                    .with_documents(numbered(30)),
            )
            .unwrap();

        let sizes = catalog.shard_sizes("docs").unwrap();
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes.iter().sum::<usize>(), 30);
        assert_eq!(catalog.document_count_estimate("docs"), Some(30));

        let map = catalog.shard_map_for("docs").unwrap();
        for shard in 0..3 {
            for document in catalog.documents("docs", Some(shard)).unwrap() {
                assert_eq!(map.responsible_shard(&[document["_key"].clone()]), shard);
            }
        }
    }

    #[test]
    fn test_implicit_and_declared_indexes() {
        let catalog = MemoryCatalog::new();
        catalog
            .create_collection(
                CollectionDefinition::new("docs")
                    .with_index(IndexDefinition::persistent(&["value"]))
                    .with_documents(numbered(8)),
            )
            .unwrap();

        let indexes = catalog.indexes_for("docs");
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].index_type, IndexType::Primary);
        assert_eq!(indexes[1].index_type, IndexType::Persistent);
        // four distinct values over eight documents
        assert_eq!(indexes[1].selectivity_estimate, 0.25);
        assert_eq!(indexes[0].selectivity_estimate, 0.125);

        catalog
            .create_collection(CollectionDefinition::edge("knows"))
            .unwrap();
        let edge_indexes = catalog.indexes_for("knows");
        assert_eq!(edge_indexes[1].index_type, IndexType::Edge);
    }

    #[test]
    fn test_satellite_collections_have_one_shard() {
        let catalog = MemoryCatalog::new();
        catalog
            .create_collection(CollectionDefinition::new("sat").with_shards(4).satellite())
            .unwrap();
        let map = catalog.shard_map_for("sat").unwrap();
        assert!(map.satellite);
        assert!(map.is_single_shard());
        assert_eq!(map.number_of_shards(), 1);
    }

    #[test]
    fn test_insert_validation() {
        let catalog = MemoryCatalog::new();
        catalog
            .create_collection(CollectionDefinition::edge("edges"))
            .unwrap();
        assert!(matches!(
            catalog.insert("edges", json!({ "_from": "a/1" })),
            Err(CatalogError::InvalidDocument(_))
        ));
        assert!(matches!(
            catalog.insert("missing", json!({})),
            Err(CatalogError::CollectionNotFound(_))
        ));

        catalog.create_collection(CollectionDefinition::new("docs")).unwrap();
        assert_eq!(catalog.insert("docs", json!({ "a": 1 })).unwrap(), "1");
        assert!(matches!(
            catalog.insert("docs", json!({ "_key": "1" })),
            Err(CatalogError::DuplicateKey { .. })
        ));
        assert!(matches!(
            catalog.create_collection(CollectionDefinition::new("docs")),
            Err(CatalogError::DuplicateCollection(_))
        ));
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{
            "collections": [
                {
                    "name": "docs",
                    "numberOfShards": 2,
                    "indexes": [{ "type": "fulltext", "fields": ["text"], "minLength": 3 }],
                    "documents": [{ "_key": "a", "text": "hello" }]
                },
                { "name": "edges", "type": "edge" }
            ]
        }"#;
        let catalog = MemoryCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.collection_names(), vec!["docs", "edges"]);
        assert_eq!(catalog.shard_map_for("docs").unwrap().number_of_shards(), 2);
        assert_eq!(
            catalog.indexes_for("docs")[1].index_type,
            IndexType::Fulltext
        );
        assert!(matches!(
            MemoryCatalog::from_json_str(r#"{ "collections": [{ "name": "x", "numberOfShards": 0 }] }"#),
            Err(CatalogError::InvalidDefinition(_))
        ));
    }
}
