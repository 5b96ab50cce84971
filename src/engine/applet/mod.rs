// SPDX-License-Identifier: MIT

//! Applet data model
//!
//! This module provides:
//! - `AppletNode` - one node of an automation tree (criterion, action or flow)
//! - `AppletTree` - the arena holding a task's nodes with index-based links
//! - `AppletResult` / `ResultPool` - pooled per-node outcomes
//! - `AppletRegistry` - the factory resolving applet ids to node shapes and behaviours

pub mod dto;
pub mod registry;
pub mod result;
pub mod tree;
pub mod value;

pub use dto::{AppletDto, TreeDto};
pub use registry::{
    Action, ActionOutput, AppletCall, AppletFactory, AppletRegistry, Behavior, Criterion, Match,
};
pub use result::{AppletResult, ResultPool};
pub use tree::{AppletTree, FlowBuilder};
pub use value::Value;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Node-kind identifier, resolved to a behaviour by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppletId(pub u32);

impl fmt::Display for AppletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Reserved ids for the built-in flow kinds and event declarations
pub mod ids {
    use super::AppletId;

    pub const ROOT: AppletId = AppletId(0x01);
    pub const WHEN: AppletId = AppletId(0x02);
    pub const IF: AppletId = AppletId(0x03);
    pub const ELSE_IF: AppletId = AppletId(0x04);
    pub const DO: AppletId = AppletId(0x05);
    pub const REPEAT: AppletId = AppletId(0x06);
    pub const BREAK: AppletId = AppletId(0x07);
    pub const FLOW: AppletId = AppletId(0x08);
    pub const WAIT_FOR: AppletId = AppletId(0x09);

    /// Event declarations under `When` use `EVENT_BASE + event code`
    pub const EVENT_BASE: u32 = 0x100;

    /// First id available to collaborator-registered criteria and actions
    pub const FIRST_USER_ID: u32 = 0x1000;
}

/// Arena index of a node inside one `AppletTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node #{}", self.0)
    }
}

/// How a node joins the running result of the siblings before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    #[default]
    And,
    Or,
}

/// Closed set of container kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Root,
    When,
    If,
    ElseIf,
    Do,
    Repeat,
    Break,
    Plain,
    WaitFor,
}

impl FlowKind {
    pub fn applet_id(self) -> AppletId {
        match self {
            FlowKind::Root => ids::ROOT,
            FlowKind::When => ids::WHEN,
            FlowKind::If => ids::IF,
            FlowKind::ElseIf => ids::ELSE_IF,
            FlowKind::Do => ids::DO,
            FlowKind::Repeat => ids::REPEAT,
            FlowKind::Break => ids::BREAK,
            FlowKind::Plain => ids::FLOW,
            FlowKind::WaitFor => ids::WAIT_FOR,
        }
    }

    pub fn from_applet_id(id: AppletId) -> Option<Self> {
        Some(match id {
            ids::ROOT => FlowKind::Root,
            ids::WHEN => FlowKind::When,
            ids::IF => FlowKind::If,
            ids::ELSE_IF => FlowKind::ElseIf,
            ids::DO => FlowKind::Do,
            ids::REPEAT => FlowKind::Repeat,
            ids::BREAK => FlowKind::Break,
            ids::FLOW => FlowKind::Plain,
            ids::WAIT_FOR => FlowKind::WaitFor,
            _ => return None,
        })
    }
}

/// What a node is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Criterion,
    Action,
    /// Event declaration, only valid under `When`
    Event,
    Flow(FlowKind),
}

impl NodeKind {
    pub fn is_flow(self) -> bool {
        matches!(self, NodeKind::Flow(_))
    }

    pub fn flow_kind(self) -> Option<FlowKind> {
        match self {
            NodeKind::Flow(kind) => Some(kind),
            _ => None,
        }
    }
}

/// One node of an automation tree
#[derive(Debug, Clone, PartialEq)]
pub struct AppletNode {
    pub id: AppletId,
    pub kind: NodeKind,
    pub relation: Relation,
    /// Flips a criterion's match; ignored for every other kind
    pub inverted: bool,
    /// Literal argument (expected value, action argument, repeat count, timeout)
    pub value: Option<Value>,
    /// argument slot -> referent name consumed
    pub references: BTreeMap<u8, String>,
    /// result slot -> referent name produced
    pub referents: BTreeMap<u8, String>,
    /// Position among siblings, assigned by `AppletTree::finalize`
    pub index: usize,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl AppletNode {
    pub fn new(id: AppletId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            relation: Relation::And,
            inverted: false,
            value: None,
            references: BTreeMap::new(),
            referents: BTreeMap::new(),
            index: 0,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn flow(kind: FlowKind) -> Self {
        let mut node = Self::new(kind.applet_id(), NodeKind::Flow(kind));
        if kind == FlowKind::ElseIf {
            node.relation = Relation::Or;
        }
        node
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = relation;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    /// Consume `name` through the next free argument slot
    pub fn refer_to(mut self, name: impl Into<String>) -> Self {
        let slot = self.references.len() as u8;
        self.references.insert(slot, name.into());
        self
    }

    /// Produce the next free result slot under `name`
    pub fn with_referent(mut self, name: impl Into<String>) -> Self {
        let slot = self.referents.len() as u8;
        self.referents.insert(slot, name.into());
        self
    }
}
