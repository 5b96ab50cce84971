// SPDX-License-Identifier: MIT

//! Event entry point
//!
//! For every enabled resident task, a run parked at a `WaitFor` receives
//! the batch whatever its kind, since the awaited event rarely matches the
//! task's `When`. Otherwise, when the `When` matches and the task is not
//! paused, a new run starts and supersedes any run in progress.

use super::manager::TaskManager;
use super::snapshot::RunOutcome;
use crate::engine::runtime::{dedup_events, Event};
use tokio::task::JoinHandle;

pub struct EventRouter {
    manager: TaskManager,
}

impl EventRouter {
    pub fn new(manager: TaskManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    /// Dispatch one batch; returns the handles of the runs it started
    pub async fn on_events(&self, events: Vec<Event>) -> Vec<JoinHandle<RunOutcome>> {
        let events = dedup_events(events);
        if events.is_empty() {
            return Vec::new();
        }

        let mut started = Vec::new();
        for task in self.manager.enabled_resident_tasks().await {
            if let Some(parked) = task.suspended_run() {
                if parked.offer_events(events.clone()) {
                    log::debug!("Resuming parked run of {}", task.identifier());
                    continue;
                }
            }
            if !task.is_triggered_by(&events) {
                continue;
            }
            if task.is_paused() {
                log::debug!("Task {} is paused, not starting a run", task.identifier());
                continue;
            }
            started.push(self.manager.spawn_launch(task, events.clone()));
        }
        started
    }
}
