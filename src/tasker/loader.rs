// SPDX-License-Identifier: MIT

//! Task and event script loading
//!
//! A task file holds the metadata fields next to a `flow` entry carrying the
//! persisted tree. An event script is a list of batches, each optionally
//! delayed, fed to the router in order.

use crate::engine::applet::TreeDto;
use crate::engine::context::EngineContext;
use crate::engine::error::EngineError;
use crate::engine::runtime::Event;
use crate::engine::task::{TaskMetadata, XTask};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFile {
    #[serde(flatten)]
    pub metadata: TaskMetadata,
    pub flow: TreeDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Wait before delivering this batch
    #[serde(default)]
    pub delay_ms: u64,
    pub events: Vec<Event>,
}

pub struct TaskLoader;

impl TaskLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load, materialize and finalize a task file
    pub fn load_task<P: AsRef<Path>>(
        &self,
        ctx: &EngineContext,
        path: P,
    ) -> Result<Arc<XTask>, EngineError> {
        let content = fs::read_to_string(path)?;
        Self::parse_task(ctx, &content)
    }

    pub fn parse_task(ctx: &EngineContext, content: &str) -> Result<Arc<XTask>, EngineError> {
        let file: TaskFile = serde_yaml::from_str(content)?;
        let tree = file.flow.into_tree(ctx.registry())?;
        XTask::compile(ctx, file.metadata, tree)
    }

    pub fn load_events<P: AsRef<Path>>(&self, path: P) -> Result<Vec<EventBatch>, EngineError> {
        let content = fs::read_to_string(path)?;
        Self::parse_events(&content)
    }

    pub fn parse_events(content: &str) -> Result<Vec<EventBatch>, EngineError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Render a task back to the file layout
    pub fn to_yaml(task: &XTask) -> Result<String, EngineError> {
        let file = TaskFile {
            metadata: task.metadata().clone(),
            flow: task.tree().to_dto(),
        };
        Ok(serde_yaml::to_string(&file)?)
    }
}

impl Default for TaskLoader {
    fn default() -> Self {
        Self::new()
    }
}
