// SPDX-License-Identifier: MIT

//! Applet factory and behaviour registry
//!
//! The engine never knows what a criterion checks or what an action does.
//! Collaborators register behaviours under applet ids; the evaluator looks them
//! up when it reaches a leaf, and `AppletTree::finalize` uses the same registry
//! to reject ids nobody registered.

use super::tree::event_type_of;
use super::{AppletId, AppletNode, FlowKind, NodeId, NodeKind, Value};
use crate::engine::runtime::{Event, GlobalValues, Target};
use async_trait::async_trait;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::sync::{Arc, RwLock};

/// Everything a behaviour may look at while it runs
pub struct AppletCall<'a> {
    pub node_id: NodeId,
    pub node: &'a AppletNode,
    /// Resolved referenced values, by argument slot
    pub args: &'a BTreeMap<u8, Value>,
    /// Opaque object resolved by the target supplier
    pub target: Option<&'a Target>,
    pub events: &'a [Event],
    pub globals: &'a GlobalValues,
    pub task_checksum: u64,
}

impl<'a> AppletCall<'a> {
    /// The literal value stored on the node
    pub fn value(&self) -> Option<&'a Value> {
        self.node.value.as_ref()
    }

    pub fn arg(&self, slot: u8) -> Option<&'a Value> {
        self.args.get(&slot)
    }

    /// Referenced slot 0 when present, otherwise the literal
    pub fn expected(&self) -> Option<&'a Value> {
        self.arg(0).or_else(|| self.value())
    }

    /// Downcast the target to a concrete collaborator type
    pub fn target_as<T: Any + Send + Sync>(&self) -> Option<&'a T> {
        self.target.and_then(|t| t.downcast_ref::<T>())
    }
}

/// Outcome of a criterion check, before inversion
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub matched: bool,
    /// The value actually observed, kept for diagnostics
    pub actual: Option<Value>,
}

impl Match {
    pub fn of(matched: bool, actual: Option<Value>) -> Self {
        Self { matched, actual }
    }

    pub fn matched(actual: Option<Value>) -> Self {
        Self::of(true, actual)
    }

    pub fn unmatched(actual: Option<Value>) -> Self {
        Self::of(false, actual)
    }
}

/// Outcome of an action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutput {
    pub successful: bool,
    /// Produced values, by result slot
    pub returned: Vec<Value>,
    pub actual: Option<Value>,
}

impl ActionOutput {
    pub fn done() -> Self {
        Self {
            successful: true,
            returned: Vec::new(),
            actual: None,
        }
    }

    pub fn returning(value: impl Into<Value>) -> Self {
        Self {
            successful: true,
            returned: vec![value.into()],
            actual: None,
        }
    }

    pub fn returning_all(values: Vec<Value>) -> Self {
        Self {
            successful: true,
            returned: values,
            actual: None,
        }
    }

    pub fn failed(actual: Option<Value>) -> Self {
        Self {
            successful: false,
            returned: Vec::new(),
            actual,
        }
    }
}

/// A condition checked against the target, events and arguments
#[async_trait]
pub trait Criterion: Send + Sync {
    async fn check(&self, call: &AppletCall<'_>) -> Result<Match, Box<dyn Error + Send + Sync>>;
}

/// A side effect
#[async_trait]
pub trait Action: Send + Sync {
    async fn perform(
        &self,
        call: &AppletCall<'_>,
    ) -> Result<ActionOutput, Box<dyn Error + Send + Sync>>;
}

#[derive(Clone)]
pub enum Behavior {
    Criterion(Arc<dyn Criterion>),
    Action(Arc<dyn Action>),
}

impl Behavior {
    pub fn kind(&self) -> NodeKind {
        match self {
            Behavior::Criterion(_) => NodeKind::Criterion,
            Behavior::Action(_) => NodeKind::Action,
        }
    }
}

/// Builds default nodes for applet ids, as used when materializing persisted trees
pub trait AppletFactory: Send + Sync {
    fn create(&self, id: AppletId) -> Option<AppletNode>;

    fn behavior(&self, id: AppletId) -> Option<Behavior>;
}

struct Entry {
    name: String,
    behavior: Behavior,
    default_value: Option<Value>,
}

/// Registry of collaborator behaviours, shared by clone
#[derive(Clone)]
pub struct AppletRegistry {
    entries: Arc<RwLock<HashMap<AppletId, Entry>>>,
}

impl AppletRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register (or replace) the behaviour of `id`
    pub fn register(
        &self,
        id: AppletId,
        name: &str,
        behavior: Behavior,
        default_value: Option<Value>,
    ) {
        if FlowKind::from_applet_id(id).is_some() || event_type_of(id).is_some() {
            log::warn!("Applet id {} is reserved, ignoring '{}'", id, name);
            return;
        }
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(
            id,
            Entry {
                name: name.to_string(),
                behavior,
                default_value,
            },
        );
    }

    pub fn register_criterion(&self, id: AppletId, name: &str, criterion: Arc<dyn Criterion>) {
        self.register(id, name, Behavior::Criterion(criterion), None);
    }

    pub fn register_action(&self, id: AppletId, name: &str, action: Arc<dyn Action>) {
        self.register(id, name, Behavior::Action(action), None);
    }

    /// Register a synchronous criterion closure
    pub fn register_criterion_fn<F>(&self, id: AppletId, name: &str, f: F)
    where
        F: Fn(&AppletCall<'_>) -> Result<Match, Box<dyn Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.register_criterion(id, name, Arc::new(FnCriterion(f)));
    }

    /// Register a synchronous action closure
    pub fn register_action_fn<F>(&self, id: AppletId, name: &str, f: F)
    where
        F: Fn(&AppletCall<'_>) -> Result<ActionOutput, Box<dyn Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.register_action(id, name, Arc::new(FnAction(f)));
    }

    pub fn name_of(&self, id: AppletId) -> Option<String> {
        if let Some(kind) = FlowKind::from_applet_id(id) {
            return Some(format!("{:?}", kind));
        }
        if let Some(event) = event_type_of(id) {
            return Some(event.to_string());
        }
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(&id).map(|e| e.name.clone())
    }
}

impl Default for AppletRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AppletFactory for AppletRegistry {
    fn create(&self, id: AppletId) -> Option<AppletNode> {
        if let Some(kind) = FlowKind::from_applet_id(id) {
            return Some(AppletNode::flow(kind));
        }
        if event_type_of(id).is_some() {
            return Some(AppletNode::new(id, NodeKind::Event));
        }
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(&id).map(|entry| {
            let mut node = AppletNode::new(id, entry.behavior.kind());
            node.value = entry.default_value.clone();
            node
        })
    }

    fn behavior(&self, id: AppletId) -> Option<Behavior> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(&id).map(|e| e.behavior.clone())
    }
}

struct FnCriterion<F>(F);

#[async_trait]
impl<F> Criterion for FnCriterion<F>
where
    F: Fn(&AppletCall<'_>) -> Result<Match, Box<dyn Error + Send + Sync>> + Send + Sync,
{
    async fn check(&self, call: &AppletCall<'_>) -> Result<Match, Box<dyn Error + Send + Sync>> {
        (self.0)(call)
    }
}

struct FnAction<F>(F);

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&AppletCall<'_>) -> Result<ActionOutput, Box<dyn Error + Send + Sync>> + Send + Sync,
{
    async fn perform(
        &self,
        call: &AppletCall<'_>,
    ) -> Result<ActionOutput, Box<dyn Error + Send + Sync>> {
        (self.0)(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::applet::ids;

    const TEXT_EQ: AppletId = AppletId(0x1000);

    #[test]
    fn test_create_flow_and_event_nodes() {
        let registry = AppletRegistry::new();
        let node = registry.create(ids::IF).unwrap();
        assert_eq!(node.kind, NodeKind::Flow(FlowKind::If));
        let node = registry.create(AppletId(ids::EVENT_BASE + 1)).unwrap();
        assert_eq!(node.kind, NodeKind::Event);
        assert!(registry.create(TEXT_EQ).is_none());
    }

    #[test]
    fn test_register_with_default_value() {
        let registry = AppletRegistry::new();
        registry.register(
            TEXT_EQ,
            "text_eq",
            Behavior::Criterion(Arc::new(FnCriterion(|_: &AppletCall<'_>| {
                Ok(Match::matched(None))
            }))),
            Some(Value::from("Login")),
        );
        let node = registry.create(TEXT_EQ).unwrap();
        assert_eq!(node.kind, NodeKind::Criterion);
        assert_eq!(node.value, Some(Value::from("Login")));
        assert_eq!(registry.name_of(TEXT_EQ).as_deref(), Some("text_eq"));
    }

    #[test]
    fn test_reserved_ids_are_not_overridden() {
        let registry = AppletRegistry::new();
        registry.register_action_fn(ids::DO, "fake", |_| Ok(ActionOutput::done()));
        assert!(registry.behavior(ids::DO).is_none());
        assert_eq!(
            registry.create(ids::DO).unwrap().kind,
            NodeKind::Flow(FlowKind::Do)
        );
    }

    #[test]
    fn test_registry_is_clone() {
        let registry = AppletRegistry::new();
        let cloned = registry.clone();
        cloned.register_action_fn(TEXT_EQ, "act", |_| Ok(ActionOutput::returning(1i64)));
        assert!(matches!(
            registry.behavior(TEXT_EQ),
            Some(Behavior::Action(_))
        ));
    }
}
