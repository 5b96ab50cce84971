// SPDX-License-Identifier: MIT

//! Per-run execution context

use super::{Event, RunControl};
use crate::engine::applet::dto::truncate_digest;
use crate::engine::applet::{AppletNode, AppletResult, NodeId, Value};
use crate::engine::task::XTask;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque collaborator object handed to criteria and actions
pub type Target = Arc<dyn Any + Send + Sync>;

/// Resolves the target a leaf applet runs against
pub trait TargetSupplier: Send + Sync {
    fn resolve(&self, node: &AppletNode, events: &[Event]) -> Option<Target>;
}

/// Progress hooks called by the evaluator, all optional
pub trait RuntimeObserver: Send + Sync {
    fn on_applet_started(&self, _node: NodeId, _applet: &AppletNode) {}

    fn on_applet_terminated(&self, _node: NodeId, _applet: &AppletNode, _result: &AppletResult) {}

    fn on_applet_skipped(&self, _node: NodeId, _applet: &AppletNode) {}
}

/// Mutable context of one run
///
/// Instances are recycled through `RuntimePool`; `reset` must put every field
/// back to the state `new` produces.
pub struct TaskRuntime {
    pub(super) task: Option<Arc<XTask>>,
    pub(super) current_applet: Option<NodeId>,
    pub(super) current_flow: Option<NodeId>,
    pub(super) events: Vec<Event>,
    /// name -> (producer, value)
    pub(super) referents: HashMap<String, (NodeId, Value)>,
    pub(super) fingerprint: Sha256,
    pub(super) touched: usize,
    pub(super) is_successful: bool,
    pub(super) if_successful: Option<bool>,
    pub(super) waiting_for: Option<NodeId>,
    pub(super) target: Option<Target>,
    pub(super) control: Arc<RunControl>,
    pub(super) observer: Option<Arc<dyn RuntimeObserver>>,
}

impl TaskRuntime {
    pub fn new() -> Self {
        Self {
            task: None,
            current_applet: None,
            current_flow: None,
            events: Vec::new(),
            referents: HashMap::new(),
            fingerprint: Sha256::new(),
            touched: 0,
            is_successful: false,
            if_successful: None,
            waiting_for: None,
            target: None,
            control: Arc::new(RunControl::new()),
            observer: None,
        }
    }

    /// Attach a run to this (clean) runtime
    pub fn bind(&mut self, task: Option<Arc<XTask>>, events: Vec<Event>, control: Arc<RunControl>) {
        self.task = task;
        self.events = events;
        self.control = control;
    }

    pub fn reset(&mut self) {
        self.task = None;
        self.current_applet = None;
        self.current_flow = None;
        self.events.clear();
        self.referents.clear();
        self.fingerprint = Sha256::new();
        self.touched = 0;
        self.is_successful = false;
        self.if_successful = None;
        self.waiting_for = None;
        self.target = None;
        self.control = Arc::new(RunControl::new());
        self.observer = None;
    }

    pub fn task(&self) -> Option<&Arc<XTask>> {
        self.task.as_ref()
    }

    /// Checksum of the owning task, 0 for detached runs
    pub fn task_checksum(&self) -> u64 {
        self.task.as_ref().map(|t| t.checksum()).unwrap_or(0)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Swap in a newer batch, dropping the previous one
    pub fn replace_events(&mut self, events: Vec<Event>) {
        self.events = events;
    }

    pub fn current_applet(&self) -> Option<NodeId> {
        self.current_applet
    }

    pub fn current_flow(&self) -> Option<NodeId> {
        self.current_flow
    }

    pub fn is_successful(&self) -> bool {
        self.is_successful
    }

    pub fn if_successful(&self) -> Option<bool> {
        self.if_successful
    }

    pub fn waiting_for(&self) -> Option<NodeId> {
        self.waiting_for
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    pub fn set_observer(&mut self, observer: Option<Arc<dyn RuntimeObserver>>) {
        self.observer = observer;
    }

    pub fn observer(&self) -> Option<&Arc<dyn RuntimeObserver>> {
        self.observer.as_ref()
    }

    pub fn is_halted(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Fold a value into the run fingerprint; order matters
    pub fn update_fingerprint(&mut self, value: &Value) {
        self.fingerprint.update(value.canonical_bytes());
        self.touched += 1;
    }

    pub fn fingerprint(&self) -> u64 {
        if self.touched == 0 {
            return 0;
        }
        truncate_digest(&self.fingerprint.clone().finalize())
    }

    pub fn referent_count(&self) -> usize {
        self.referents.len()
    }
}

impl Default for TaskRuntime {
    fn default() -> Self {
        Self::new()
    }
}
