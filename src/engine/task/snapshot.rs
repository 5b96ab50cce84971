// SPDX-License-Identifier: MIT

//! Execution history

use crate::engine::applet::{AppletNode, AppletResult, NodeId};
use crate::engine::runtime::RuntimeObserver;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failure,
    Error(String),
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

/// Record of one finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    /// Checksum of the task version that ran
    pub checksum: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub fingerprint: u64,
    /// Leaf applets that succeeded / failed
    pub successes: usize,
    pub failures: usize,
    pub error: Option<String>,
    pub log: Vec<String>,
    /// Identical runs folded into this one
    pub repeats: u32,
}

impl TaskSnapshot {
    fn same_as(&self, other: &TaskSnapshot) -> bool {
        self.fingerprint == other.fingerprint && self.outcome == other.outcome
    }
}

/// Bounded, newest-first snapshot list
#[derive(Debug, Default)]
pub struct SnapshotHistory {
    entries: Mutex<VecDeque<TaskSnapshot>>,
}

impl SnapshotHistory {
    /// Add a snapshot, folding it into the newest one when the run was identical
    pub fn record(&self, snapshot: TaskSnapshot, capacity: usize) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(newest) = entries.front_mut() {
            if newest.same_as(&snapshot) {
                newest.repeats += 1;
                newest.finished_at = snapshot.finished_at;
                return;
            }
        }
        entries.push_front(snapshot);
        entries.truncate(capacity);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Drop the log lines of one snapshot, keeping its summary
    pub fn clear_log(&self, snapshot: Uuid) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.iter_mut().find(|s| s.id == snapshot) {
            Some(entry) => {
                entry.log.clear();
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Counters {
    successes: usize,
    failures: usize,
    log: Vec<String>,
}

/// Runtime observer collecting the data of one snapshot
pub struct SnapshotRecorder {
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl SnapshotRecorder {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn push(&self, line: String) {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        counters.log.push(line);
    }

    pub fn finish(&self, checksum: u64, outcome: RunOutcome, fingerprint: u64) -> TaskSnapshot {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        let error = match &outcome {
            RunOutcome::Error(message) => Some(message.clone()),
            _ => None,
        };
        TaskSnapshot {
            id: Uuid::new_v4(),
            checksum,
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome,
            fingerprint,
            successes: counters.successes,
            failures: counters.failures,
            error,
            log: std::mem::take(&mut counters.log),
            repeats: 0,
        }
    }
}

impl Default for SnapshotRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeObserver for SnapshotRecorder {
    fn on_applet_terminated(&self, node: NodeId, applet: &AppletNode, result: &AppletResult) {
        if applet.kind.is_flow() {
            return;
        }
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        if result.is_successful() {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        let line = match (result.error(), result.actual()) {
            (Some(error), _) => format!("{} ({}) raised: {}", node, applet.id, error),
            (None, Some(actual)) if !result.is_successful() => {
                format!("{} ({}) failed, actual {}", node, applet.id, actual)
            }
            _ if result.is_successful() => format!("{} ({}) succeeded", node, applet.id),
            _ => format!("{} ({}) failed", node, applet.id),
        };
        counters.log.push(line);
    }

    fn on_applet_skipped(&self, node: NodeId, applet: &AppletNode) {
        if !applet.kind.is_flow() {
            self.push(format!("{} ({}) skipped", node, applet.id));
        }
    }
}
