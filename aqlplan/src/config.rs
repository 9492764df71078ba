// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Optimizer configuration
//!
//! Loaded from JSON with camelCase keys; every field has a default, so a
//! configuration file only needs to name what it changes:
//!
//! ```json
//! { "cluster": true, "gatherHeapThreshold": 5, "costModel": { "defaultListEstimate": 50 } }
//! ```

use crate::plan::cost::CostModel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizerConfig {
    /// Plan for a sharded deployment: enables the cluster rules
    pub cluster: bool,
    /// Upper bound on the number of candidate plans
    pub max_number_of_plans: usize,
    /// Shard count from which a sorted Gather merges with a heap
    pub gather_heap_threshold: usize,
    pub cost_model: CostModel,
    /// Rule selection applied before the per-query selection
    pub default_rules: Vec<String>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cluster: false,
            max_number_of_plans: 128,
            gather_heap_threshold: 5,
            cost_model: CostModel::default(),
            default_rules: Vec::new(),
        }
    }
}

impl OptimizerConfig {
    /// Default configuration with the cluster rules enabled
    pub fn cluster() -> Self {
        Self {
            cluster: true,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_number_of_plans == 0 {
            return Err(ConfigError::Invalid(
                "maxNumberOfPlans must be at least 1".to_string(),
            ));
        }
        if self.gather_heap_threshold == 0 {
            return Err(ConfigError::Invalid(
                "gatherHeapThreshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = OptimizerConfig::from_json_str(
            r#"{ "cluster": true, "costModel": { "defaultListEstimate": 50 } }"#,
        )
        .unwrap();
        assert!(config.cluster);
        assert_eq!(config.max_number_of_plans, 128);
        assert_eq!(config.gather_heap_threshold, 5);
        assert_eq!(config.cost_model.default_list_estimate, 50);
        assert_eq!(config.cost_model.per_document_enumeration_cost, 1.0);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            OptimizerConfig::from_json_str(r#"{ "maxNumberOfPlans": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            OptimizerConfig::from_json_str("{ nope"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "defaultRules": ["-all", "+use-indexes"] }}"#).unwrap();
        let config = OptimizerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_rules, vec!["-all", "+use-indexes"]);
        assert!(!config.cluster);
    }
}
