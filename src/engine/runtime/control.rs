// SPDX-License-Identifier: MIT

//! Run state machine shared between a run and whoever may halt or resume it

use super::Event;
use crate::engine::applet::NodeId;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Parked at a `WaitFor`, waiting for a new event batch
    Suspended(NodeId),
    Completed,
    Cancelled,
}

struct Inner {
    state: RunState,
    inbox: Option<Vec<Event>>,
}

/// Handle on one run
///
/// Created per launch and never pooled, so a stale handle can only ever
/// reach the run it was made for.
pub struct RunControl {
    token: CancellationToken,
    finished: CancellationToken,
    inner: Mutex<Inner>,
    wake: Notify,
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            finished: CancellationToken::new(),
            inner: Mutex::new(Inner {
                state: RunState::Running,
                inbox: None,
            }),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.state(), RunState::Suspended(_))
    }

    /// Request cancellation; calling it again has no further effect
    pub fn halt(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Park the run at `node`
    pub(crate) fn suspend(&self, node: NodeId) {
        let mut inner = self.lock();
        inner.state = RunState::Suspended(node);
        inner.inbox = None;
    }

    /// Hand a batch to a parked run; returns false when the run is not parked
    ///
    /// A batch offered while an earlier one is still unread replaces it.
    pub fn offer_events(&self, events: Vec<Event>) -> bool {
        let mut inner = self.lock();
        if !matches!(inner.state, RunState::Suspended(_)) {
            return false;
        }
        inner.inbox = Some(events);
        drop(inner);
        self.wake.notify_one();
        true
    }

    /// Wait for the next offered batch and mark the run running again
    pub(crate) async fn next_batch(&self) -> Vec<Event> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(events) = inner.inbox.take() {
                    inner.state = RunState::Running;
                    return events;
                }
            }
            self.wake.notified().await;
        }
    }

    /// Leave the suspended state without a new batch (timeout)
    pub(crate) fn resume_empty(&self) {
        let mut inner = self.lock();
        inner.state = RunState::Running;
        inner.inbox = None;
    }

    /// Record the terminal state and release everyone awaiting `finished`
    pub(crate) fn complete(&self, cancelled: bool) {
        {
            let mut inner = self.lock();
            inner.state = if cancelled {
                RunState::Cancelled
            } else {
                RunState::Completed
            };
            inner.inbox = None;
        }
        self.finished.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolves once the run has delivered its outcome
    pub async fn finished(&self) {
        self.finished.cancelled().await
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}
