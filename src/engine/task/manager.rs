// SPDX-License-Identifier: MIT

//! Owner of enabled tasks and their lifecycle

use super::snapshot::{RunOutcome, TaskSnapshot};
use super::xtask::{TaskStateListener, XTask};
use crate::engine::context::EngineContext;
use crate::engine::error::EngineError;
use crate::engine::runtime::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Single subscriber notified whenever a task's pause state changes
pub trait PauseListener: Send + Sync {
    /// `remaining` is `None` once the task is no longer paused
    fn on_pause_state_changed(&self, task: &XTask, remaining: Option<Duration>);
}

/// Task manager, shared by clone
#[derive(Clone)]
pub struct TaskManager {
    ctx: Arc<EngineContext>,
    tasks: Arc<RwLock<Vec<Arc<XTask>>>>,
    listener: Option<Arc<dyn TaskStateListener>>,
    pause_listener: Arc<std::sync::RwLock<Option<Arc<dyn PauseListener>>>>,
}

impl TaskManager {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            tasks: Arc::new(RwLock::new(Vec::new())),
            listener: None,
            pause_listener: Arc::new(std::sync::RwLock::new(None)),
        }
    }

    /// Receive lifecycle callbacks of every run started by this manager
    pub fn with_listener(mut self, listener: Arc<dyn TaskStateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub async fn get(&self, checksum: u64) -> Option<Arc<XTask>> {
        let tasks = self.tasks.read().await;
        tasks.iter().find(|t| t.checksum() == checksum).cloned()
    }

    async fn require(&self, checksum: u64) -> Result<Arc<XTask>, EngineError> {
        self.get(checksum)
            .await
            .ok_or(EngineError::TaskNotFound(checksum))
    }

    pub async fn is_task_existent(&self, checksum: u64) -> bool {
        self.get(checksum).await.is_some()
    }

    pub async fn tasks(&self) -> Vec<Arc<XTask>> {
        self.tasks.read().await.clone()
    }

    pub async fn enabled_resident_tasks(&self) -> Vec<Arc<XTask>> {
        let tasks = self.tasks.read().await;
        tasks
            .iter()
            .filter(|t| t.is_resident() && t.is_enabled())
            .cloned()
            .collect()
    }

    pub async fn enable_resident(&self, task: Arc<XTask>) -> Result<(), EngineError> {
        if !task.is_resident() {
            return Err(EngineError::other(format!(
                "Task '{}' is not resident",
                task.title()
            )));
        }
        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.checksum() == task.checksum()) {
            return Err(EngineError::DuplicateTask {
                title: task.title().to_string(),
                checksum: task.checksum(),
            });
        }
        task.set_enabled(true);
        log::info!(
            "Enabled resident task {} ({})",
            task.title(),
            task.identifier()
        );
        tasks.push(task);
        Ok(())
    }

    /// Add a oneshot task unless one with the same checksum is present
    pub async fn add_oneshot_if_absent(&self, task: Arc<XTask>) -> Result<bool, EngineError> {
        if task.is_resident() {
            return Err(EngineError::other(format!(
                "Task '{}' is not oneshot",
                task.title()
            )));
        }
        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.checksum() == task.checksum()) {
            return Ok(false);
        }
        task.set_enabled(true);
        tasks.push(task);
        Ok(true)
    }

    /// Run a oneshot task to completion, then discard it
    pub async fn launch_oneshot(
        &self,
        checksum: u64,
        events: Vec<Event>,
    ) -> Result<RunOutcome, EngineError> {
        let task = self.require(checksum).await?;
        if task.is_resident() {
            return Err(EngineError::other(format!(
                "Task '{}' is resident, it runs on events",
                task.title()
            )));
        }
        let outcome = task
            .launch(&self.ctx, events, self.listener.as_deref())
            .await;
        self.detach(&task).await;
        log::info!("Oneshot task {} ({}) removed", task.title(), task.identifier());
        Ok(outcome)
    }

    /// Start a run of `task` on its own tokio task
    pub fn spawn_launch(&self, task: Arc<XTask>, events: Vec<Event>) -> JoinHandle<RunOutcome> {
        let ctx = self.ctx.clone();
        let listener = self.listener.clone();
        tokio::spawn(async move { task.launch(&ctx, events, listener.as_deref()).await })
    }

    /// Replace the task with checksum `old` by `task`
    ///
    /// The old version's run in progress is halted and the snapshot history
    /// starts over.
    pub async fn update(&self, old: u64, task: Arc<XTask>) -> Result<(), EngineError> {
        let previous = {
            let mut tasks = self.tasks.write().await;
            let index = tasks
                .iter()
                .position(|t| t.checksum() == old)
                .ok_or(EngineError::TaskNotFound(old))?;
            if task.checksum() != old && tasks.iter().any(|t| t.checksum() == task.checksum()) {
                return Err(EngineError::DuplicateTask {
                    title: task.title().to_string(),
                    checksum: task.checksum(),
                });
            }
            let slot = &mut tasks[index];
            task.set_enabled(slot.is_enabled());
            std::mem::replace(slot, task.clone())
        };
        previous.set_enabled(false);
        previous.halt().await;
        previous.snapshots().clear();
        task.snapshots().clear();
        log::info!(
            "Task {} updated ({} -> {})",
            task.title(),
            previous.identifier(),
            task.identifier()
        );
        Ok(())
    }

    async fn detach(&self, task: &Arc<XTask>) -> bool {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| !Arc::ptr_eq(t, task));
        task.set_enabled(false);
        tasks.len() != before
    }

    /// Remove a task of any type, halting its run in progress
    pub async fn remove(&self, checksum: u64) -> Option<Arc<XTask>> {
        let task = self.get(checksum).await?;
        self.detach(&task).await;
        task.halt().await;
        log::info!("Removed task {} ({})", task.title(), task.identifier());
        Some(task)
    }

    pub async fn disable_resident(&self, checksum: u64) -> Result<(), EngineError> {
        match self.get(checksum).await {
            Some(task) if task.is_resident() => {
                self.remove(checksum).await;
                Ok(())
            }
            _ => Err(EngineError::TaskNotFound(checksum)),
        }
    }

    pub fn set_pause_listener(&self, listener: Option<Arc<dyn PauseListener>>) {
        let mut slot = self
            .pause_listener
            .write()
            .unwrap_or_else(|p| p.into_inner());
        *slot = listener;
    }

    fn notify_pause(&self, task: &XTask, remaining: Option<Duration>) {
        let listener = self
            .pause_listener
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener.on_pause_state_changed(task, remaining);
        }
    }

    /// Keep a resident task from starting runs for `duration`
    ///
    /// A run already in progress continues.
    pub async fn pause(&self, checksum: u64, duration: Duration) -> Result<(), EngineError> {
        let task = self.require(checksum).await?;
        let started = task.pause_for(duration);
        log::info!(
            "Task {} ({}) paused for {:?}",
            task.title(),
            task.identifier(),
            duration
        );
        self.notify_pause(&task, Some(duration));

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if task.clear_pause_started_at(started) {
                log::info!("Task {} ({}) pause expired", task.title(), task.identifier());
                manager.notify_pause(&task, None);
            }
        });
        Ok(())
    }

    /// End a pause early; false when the task was not paused
    pub async fn resume(&self, checksum: u64) -> Result<bool, EngineError> {
        let task = self.require(checksum).await?;
        let was_paused = task.clear_pause();
        if was_paused {
            log::info!("Task {} ({}) resumed", task.title(), task.identifier());
            self.notify_pause(&task, None);
        }
        Ok(was_paused)
    }

    /// Remaining pause time, `None` when not paused
    pub async fn pause_info(&self, checksum: u64) -> Result<Option<Duration>, EngineError> {
        Ok(self.require(checksum).await?.remaining_pause())
    }

    pub async fn snapshot_count(&self, checksum: u64) -> Result<usize, EngineError> {
        Ok(self.require(checksum).await?.snapshots().len())
    }

    pub async fn snapshots(&self, checksum: u64) -> Result<Vec<TaskSnapshot>, EngineError> {
        Ok(self.require(checksum).await?.snapshots().list())
    }

    pub async fn clear_snapshots(&self, checksum: u64) -> Result<(), EngineError> {
        self.require(checksum).await?.snapshots().clear();
        Ok(())
    }

    pub async fn clear_all_snapshots(&self) {
        for task in self.tasks.read().await.iter() {
            task.snapshots().clear();
        }
    }

    /// Drop the log of one snapshot; false when no such snapshot exists
    pub async fn clear_log(&self, checksum: u64, snapshot: Uuid) -> Result<bool, EngineError> {
        Ok(self.require(checksum).await?.snapshots().clear_log(snapshot))
    }

    /// Disable every task, halt every run and drain the pools
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.write().await);
        for task in &tasks {
            task.set_enabled(false);
            task.halt().await;
        }
        self.ctx.shutdown();
        log::info!("Task manager shut down ({} task(s))", tasks.len());
    }
}
