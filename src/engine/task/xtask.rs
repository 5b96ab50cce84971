// SPDX-License-Identifier: MIT

//! Long-lived task entity and its launch protocol

use super::snapshot::{RunOutcome, SnapshotHistory, SnapshotRecorder};
use crate::engine::applet::dto::truncate_digest;
use crate::engine::applet::{AppletTree, TreeDto};
use crate::engine::context::EngineContext;
use crate::engine::error::EngineError;
use crate::engine::runtime::{Evaluator, Event, EventType, RunControl, TaskRuntime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Stays enabled and runs on every matching event
    Resident,
    /// Runs once, then is discarded
    Oneshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
    /// Filled in by `XTask::new`
    #[serde(default)]
    pub checksum: u64,
    /// Enable on load
    #[serde(default)]
    pub preload: bool,
}

impl TaskMetadata {
    pub fn new(title: impl Into<String>, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            title: title.into(),
            task_type,
            description: None,
            author: None,
            created_at: now,
            modified_at: now,
            checksum: 0,
            preload: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Short form of the checksum shown to users
    pub fn identifier(&self) -> String {
        format!("{:016x}", self.checksum)[..7].to_string()
    }
}

/// Fields that make up a task's identity; timestamps are left out
#[derive(Serialize)]
struct ChecksumInput<'a> {
    title: &'a str,
    task_type: TaskType,
    description: Option<&'a str>,
    author: Option<&'a str>,
    flow: TreeDto,
}

/// Deterministic structural checksum of metadata identity plus tree shape
pub fn compute_checksum(metadata: &TaskMetadata, tree: &AppletTree) -> Result<u64, EngineError> {
    let input = ChecksumInput {
        title: &metadata.title,
        task_type: metadata.task_type,
        description: metadata.description.as_deref(),
        author: metadata.author.as_deref(),
        flow: tree.to_dto(),
    };
    let bytes = serde_json::to_vec(&input)?;
    Ok(truncate_digest(&Sha256::digest(&bytes)))
}

/// Lifecycle callbacks; exactly one terminal callback is delivered per run
///
/// The runtime is only valid for the duration of the call.
pub trait TaskStateListener: Send + Sync {
    fn on_started(&self, _task: &XTask, _runtime: &TaskRuntime) {}

    fn on_success(&self, _task: &XTask, _runtime: &TaskRuntime) {}

    fn on_failure(&self, _task: &XTask, _runtime: &TaskRuntime) {}

    fn on_error(&self, _task: &XTask, _runtime: &TaskRuntime, _error: &EngineError) {}

    fn on_cancelled(&self, _task: &XTask, _runtime: &TaskRuntime) {}
}

#[derive(Debug, Clone, Copy)]
struct PauseWindow {
    started: Instant,
    duration: Duration,
}

pub struct XTask {
    metadata: TaskMetadata,
    tree: AppletTree,
    triggers: Vec<EventType>,
    enabled: AtomicBool,
    /// Control of the run in progress, at most one
    active: Mutex<Option<Arc<RunControl>>>,
    pause: Mutex<Option<PauseWindow>>,
    snapshots: SnapshotHistory,
}

impl XTask {
    /// Wrap a finalized tree; the checksum is computed here
    pub fn new(mut metadata: TaskMetadata, tree: AppletTree) -> Result<Self, EngineError> {
        if !tree.is_finalized() {
            return Err(EngineError::NotFinalized);
        }
        metadata.checksum = compute_checksum(&metadata, &tree)?;
        Ok(Self {
            triggers: tree.trigger_events(),
            metadata,
            tree,
            enabled: AtomicBool::new(false),
            active: Mutex::new(None),
            pause: Mutex::new(None),
            snapshots: SnapshotHistory::default(),
        })
    }

    /// Finalize `tree` against the context registry and wrap it
    pub fn compile(
        ctx: &EngineContext,
        metadata: TaskMetadata,
        mut tree: AppletTree,
    ) -> Result<Arc<Self>, EngineError> {
        ctx.finalize(&mut tree)?;
        Ok(Arc::new(Self::new(metadata, tree)?))
    }

    pub fn metadata(&self) -> &TaskMetadata {
        &self.metadata
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    pub fn checksum(&self) -> u64 {
        self.metadata.checksum
    }

    pub fn identifier(&self) -> String {
        self.metadata.identifier()
    }

    pub fn task_type(&self) -> TaskType {
        self.metadata.task_type
    }

    pub fn is_resident(&self) -> bool {
        self.metadata.task_type == TaskType::Resident
    }

    pub fn tree(&self) -> &AppletTree {
        &self.tree
    }

    pub fn triggers(&self) -> &[EventType] {
        &self.triggers
    }

    /// Whether any event of the batch matches a declared trigger
    pub fn is_triggered_by(&self, events: &[Event]) -> bool {
        self.triggers
            .iter()
            .any(|t| events.iter().any(|e| t.matches(e.kind())))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<Arc<RunControl>>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Control of the run in progress
    pub fn active_run(&self) -> Option<Arc<RunControl>> {
        self.lock_active().clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock_active().is_some()
    }

    /// The run in progress when it is parked at a `WaitFor`
    pub fn suspended_run(&self) -> Option<Arc<RunControl>> {
        self.lock_active().clone().filter(|c| c.is_suspended())
    }

    /// Cancel the run in progress, if any, and wait for its outcome
    pub async fn halt(&self) {
        let active = self.active_run();
        if let Some(control) = active {
            control.halt();
            control.finished().await;
        }
    }

    fn lock_pause(&self) -> MutexGuard<'_, Option<PauseWindow>> {
        self.pause.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start (or restart) a pause window; returns its start instant
    pub(crate) fn pause_for(&self, duration: Duration) -> Instant {
        let started = Instant::now();
        *self.lock_pause() = Some(PauseWindow { started, duration });
        started
    }

    /// Clear the pause window; false when the task was not paused
    pub(crate) fn clear_pause(&self) -> bool {
        self.lock_pause().take().is_some()
    }

    /// Clear the pause window only if it is still the one started at `started`
    pub(crate) fn clear_pause_started_at(&self, started: Instant) -> bool {
        let mut pause = self.lock_pause();
        match *pause {
            Some(window) if window.started == started => {
                *pause = None;
                true
            }
            _ => false,
        }
    }

    /// Time left in the pause window, `None` when not paused
    pub fn remaining_pause(&self) -> Option<Duration> {
        let pause = *self.lock_pause();
        pause.and_then(|window| {
            let elapsed = window.started.elapsed();
            window
                .duration
                .checked_sub(elapsed)
                .filter(|left| !left.is_zero())
        })
    }

    pub fn is_paused(&self) -> bool {
        self.remaining_pause().is_some()
    }

    pub fn snapshots(&self) -> &SnapshotHistory {
        &self.snapshots
    }

    /// Run the tree against `events` and report the outcome
    ///
    /// A run already in progress is halted first and its terminal callback
    /// has been delivered before this run starts. Exactly one terminal
    /// callback is delivered for this run.
    pub async fn launch(
        self: &Arc<Self>,
        ctx: &EngineContext,
        events: Vec<Event>,
        listener: Option<&dyn TaskStateListener>,
    ) -> RunOutcome {
        let control = Arc::new(RunControl::new());
        let previous = self.lock_active().replace(control.clone());
        if let Some(previous) = previous {
            log::info!(
                "Task {} ({}) re-triggered, halting the run in progress",
                self.title(),
                self.identifier()
            );
            previous.halt();
            previous.finished().await;
        }

        let recorder = Arc::new(SnapshotRecorder::new());
        let mut rt = ctx
            .runtimes()
            .acquire(Some(self.clone()), events, control.clone());
        rt.set_observer(Some(recorder.clone()));

        log::info!(
            "Task {} ({}) started with {} event(s)",
            self.title(),
            self.identifier(),
            rt.events().len()
        );
        if let Some(listener) = listener {
            listener.on_started(self, &rt);
        }

        let result = match Evaluator::new(ctx, &self.tree) {
            Ok(evaluator) => {
                tokio::select! {
                    biased;
                    _ = control.cancelled() => Err(EngineError::Cancelled),
                    result = evaluator.run(&mut rt) => result,
                }
            }
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(_) if control.is_cancelled() => RunOutcome::Cancelled,
            Ok(true) => RunOutcome::Success,
            Ok(false) => RunOutcome::Failure,
            Err(e) if e.is_cancelled() => RunOutcome::Cancelled,
            Err(e) => {
                log::error!(
                    "Task {} ({}) hit an engine error: {}",
                    self.title(),
                    self.identifier(),
                    e
                );
                if let Some(listener) = listener {
                    listener.on_error(self, &rt, &e);
                }
                RunOutcome::Error(e.to_string())
            }
        };
        log::info!(
            "Task {} ({}) finished: {:?}",
            self.title(),
            self.identifier(),
            outcome
        );

        if let Some(listener) = listener {
            match outcome {
                RunOutcome::Success => listener.on_success(self, &rt),
                RunOutcome::Failure => listener.on_failure(self, &rt),
                RunOutcome::Cancelled => listener.on_cancelled(self, &rt),
                RunOutcome::Error(_) => {}
            }
        }

        let snapshot = recorder.finish(self.checksum(), outcome.clone(), rt.fingerprint());
        self.snapshots.record(snapshot, ctx.config().max_snapshots);

        {
            let mut active = self.lock_active();
            if active.as_ref().map_or(false, |a| Arc::ptr_eq(a, &control)) {
                *active = None;
            }
        }
        drop(rt);
        control.complete(outcome == RunOutcome::Cancelled);
        outcome
    }
}

impl std::fmt::Debug for XTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XTask")
            .field("title", &self.metadata.title)
            .field("checksum", &format_args!("{:016x}", self.metadata.checksum))
            .field("type", &self.metadata.task_type)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
