// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query results and batched cursors

use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use uuid::Uuid;

/// Counters collected while executing a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    /// Documents read by full collection scans
    pub scanned_full: u64,
    /// Documents produced by index lookups
    pub scanned_index: u64,
    /// Rows removed by filters
    pub filtered: u64,
    /// Seconds
    pub execution_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Value>,
    /// Rows that reached the last LIMIT before it was applied, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_count: Option<u64>,
    pub stats: ExecutionStats,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result rows handed out in batches
#[derive(Debug)]
pub struct Cursor {
    id: Uuid,
    rows: VecDeque<Value>,
    batch_size: usize,
    count: usize,
    full_count: Option<u64>,
    stats: ExecutionStats,
}

impl Cursor {
    /// A batch size of 0 is treated as 1
    pub fn new(result: QueryResult, batch_size: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            count: result.rows.len(),
            rows: result.rows.into(),
            batch_size: batch_size.max(1),
            full_count: result.full_count,
            stats: result.stats,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Total number of rows, fetched or not
    pub fn row_count(&self) -> usize {
        self.count
    }

    pub fn full_count(&self) -> Option<u64> {
        self.full_count
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn has_more(&self) -> bool {
        !self.rows.is_empty()
    }

    pub fn next_batch(&mut self) -> Option<Vec<Value>> {
        if self.rows.is_empty() {
            return None;
        }
        let take = self.batch_size.min(self.rows.len());
        Some(self.rows.drain(..take).collect())
    }

    /// Remaining rows in one vector
    pub fn drain_all(&mut self) -> Vec<Value> {
        self.rows.drain(..).collect()
    }
}

impl Iterator for Cursor {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}
