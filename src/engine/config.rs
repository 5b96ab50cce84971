// SPDX-License-Identifier: MIT

//! Engine configuration

use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Idle runtimes kept for reuse
    pub runtime_pool_size: usize,
    /// Idle result payloads kept for reuse
    pub result_pool_size: usize,
    /// Deepest allowed flow nesting; the root flow is depth 0
    pub max_flow_depth: usize,
    /// Snapshots retained per task
    pub max_snapshots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runtime_pool_size: 10,
            result_pool_size: 16,
            max_flow_depth: 8,
            max_snapshots: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Defaults overridden by `TASKER_*` environment variables
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();
        override_from_env("TASKER_RUNTIME_POOL_SIZE", &mut config.runtime_pool_size)?;
        override_from_env("TASKER_RESULT_POOL_SIZE", &mut config.result_pool_size)?;
        override_from_env("TASKER_MAX_FLOW_DEPTH", &mut config.max_flow_depth)?;
        override_from_env("TASKER_MAX_SNAPSHOTS", &mut config.max_snapshots)?;
        Ok(config)
    }
}

fn override_from_env(key: &str, slot: &mut usize) -> Result<(), EngineError> {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| EngineError::config(format!("{} must be a number, got '{}'", key, raw)))?;
    }
    Ok(())
}
