// SPDX-License-Identifier: MIT

//! Arena-backed applet tree
//!
//! Nodes live in one `Vec` and link to each other by `NodeId`. The root flow
//! is always `NodeId(0)`. A tree must pass `finalize` (index assignment plus
//! static checks) before it can be executed.

use super::{ids, AppletFactory, AppletId, AppletNode, FlowKind, NodeId, NodeKind, Relation, Value};
use crate::engine::error::{StaticError, StaticErrorCode};
use crate::engine::runtime::EventType;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct AppletTree {
    nodes: Vec<AppletNode>,
    /// Break node -> the Repeat it terminates
    break_targets: HashMap<NodeId, NodeId>,
    finalized: bool,
}

impl AppletTree {
    /// Create a tree holding only an empty root flow
    pub fn new() -> Self {
        Self {
            nodes: vec![AppletNode::flow(FlowKind::Root)],
            break_targets: HashMap::new(),
            finalized: false,
        }
    }

    /// Build a tree through the flow DSL
    pub fn build(init: impl FnOnce(&mut FlowBuilder<'_>)) -> Self {
        let mut tree = Self::new();
        let root = tree.root();
        init(&mut FlowBuilder { tree: &mut tree, flow: root });
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].children.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn node(&self, id: NodeId) -> &AppletNode {
        &self.nodes[id.index()]
    }

    /// Mutable access invalidates a previous `finalize`
    pub fn node_mut(&mut self, id: NodeId) -> &mut AppletNode {
        self.finalized = false;
        &mut self.nodes[id.index()]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    /// Append `node` as the last child of `parent`
    pub fn add(&mut self, parent: NodeId, mut node: AppletNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        node.parent = Some(parent);
        node.index = self.nodes[parent.index()].children.len();
        node.children.clear();
        self.nodes.push(node);
        self.nodes[parent.index()].children.push(id);
        self.finalized = false;
        id
    }

    /// The sibling right before `id`, if any
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id);
        let parent = node.parent?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    /// The Repeat a Break node terminates; available after `finalize`
    pub fn break_target(&self, id: NodeId) -> Option<NodeId> {
        self.break_targets.get(&id).copied()
    }

    /// The `When` declaration of the root flow, if the task has one
    pub fn when_node(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|c| self.node(*c).kind == NodeKind::Flow(FlowKind::When))
    }

    /// Event types declared under the root `When`
    pub fn trigger_events(&self) -> Vec<EventType> {
        self.when_node()
            .map(|when| {
                self.children(when)
                    .iter()
                    .filter_map(|c| event_type_of(self.node(*c).id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Node ids in depth-first, index order
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    /// Assign indices and run every static check
    ///
    /// Checks, in depth-first order: applet ids are known to `factory`, flow
    /// nesting stays within `max_depth`, `When` sits directly under the root and
    /// only holds event declarations, `ElseIf` follows a `Do`, `Break` lives in a
    /// `Repeat`, `Repeat` has a count, and every referenced name is produced by a
    /// node that comes strictly earlier.
    pub fn finalize(
        &mut self,
        factory: &dyn AppletFactory,
        max_depth: usize,
    ) -> Result<(), StaticError> {
        self.finalized = false;
        self.break_targets.clear();

        for parent in 0..self.nodes.len() {
            let children = self.nodes[parent].children.clone();
            for (index, child) in children.into_iter().enumerate() {
                self.nodes[child.index()].index = index;
            }
        }

        let mut produced: HashSet<&str> = HashSet::new();
        let mut break_targets = HashMap::new();
        // (node, flow depth, nearest enclosing repeat)
        let mut stack: Vec<(NodeId, usize, Option<NodeId>)> = vec![(self.root(), 0, None)];

        while let Some((id, depth, repeat)) = stack.pop() {
            let node = &self.nodes[id.index()];
            let fail = |code| Err(StaticError::new(id, node.id, code));

            let parent_kind = node.parent.map(|p| self.nodes[p.index()].kind);
            match node.kind {
                NodeKind::Flow(FlowKind::Root) if id != self.root() => {
                    return fail(StaticErrorCode::MisplacedChild)
                }
                NodeKind::Flow(_) if depth > max_depth => {
                    return fail(StaticErrorCode::MaximumDepthExceeded(max_depth))
                }
                NodeKind::Flow(FlowKind::When)
                    if parent_kind != Some(NodeKind::Flow(FlowKind::Root)) =>
                {
                    return fail(StaticErrorCode::WhenOutsideRoot)
                }
                NodeKind::Flow(FlowKind::ElseIf) => {
                    let follows_do = self
                        .previous_sibling(id)
                        .map(|p| self.nodes[p.index()].kind == NodeKind::Flow(FlowKind::Do))
                        .unwrap_or(false);
                    if !follows_do {
                        return fail(StaticErrorCode::ElseIfNotFollowingDo);
                    }
                }
                NodeKind::Flow(FlowKind::Break) => match repeat {
                    Some(target) if node.children.is_empty() => {
                        break_targets.insert(id, target);
                    }
                    Some(_) => return fail(StaticErrorCode::MisplacedChild),
                    None => return fail(StaticErrorCode::BreakOutsideRepeat),
                },
                NodeKind::Flow(FlowKind::Repeat) => {
                    let literal = node.value.as_ref().and_then(Value::as_i64);
                    if !node.references.contains_key(&0) && !matches!(literal, Some(n) if n >= 0)
                    {
                        return fail(StaticErrorCode::MissingRepeatCount);
                    }
                }
                NodeKind::Event => {
                    if parent_kind != Some(NodeKind::Flow(FlowKind::When))
                        || event_type_of(node.id).is_none()
                    {
                        return fail(StaticErrorCode::MisplacedChild);
                    }
                }
                NodeKind::Criterion | NodeKind::Action => {
                    if parent_kind == Some(NodeKind::Flow(FlowKind::When)) {
                        return fail(StaticErrorCode::MisplacedChild);
                    }
                    if factory.create(node.id).is_none() {
                        return fail(StaticErrorCode::UnknownApplet);
                    }
                }
                _ => {}
            }
            if !node.kind.is_flow() && !node.children.is_empty() {
                return fail(StaticErrorCode::MisplacedChild);
            }

            for name in node.references.values() {
                if !produced.contains(name.as_str()) {
                    return fail(StaticErrorCode::UnresolvedReference(name.clone()));
                }
            }
            produced.extend(node.referents.values().map(String::as_str));

            let repeat = if node.kind == NodeKind::Flow(FlowKind::Repeat) {
                Some(id)
            } else {
                repeat
            };
            let child_depth = if node.kind.is_flow() { depth + 1 } else { depth };
            for child in node.children.iter().rev() {
                stack.push((*child, child_depth, repeat));
            }
        }

        self.break_targets = break_targets;
        self.finalized = true;
        Ok(())
    }
}

impl Default for AppletTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Event type declared by an event applet id
pub fn event_type_of(id: AppletId) -> Option<EventType> {
    id.0.checked_sub(ids::EVENT_BASE)
        .and_then(|code| i32::try_from(code).ok())
        .and_then(EventType::from_code)
}

/// Scoped builder appending children to one flow
pub struct FlowBuilder<'a> {
    tree: &'a mut AppletTree,
    flow: NodeId,
}

impl<'a> FlowBuilder<'a> {
    /// The flow this builder appends to
    pub fn id(&self) -> NodeId {
        self.flow
    }

    /// Append a leaf (or an empty flow) and return its id
    pub fn add(&mut self, node: AppletNode) -> NodeId {
        self.tree.add(self.flow, node)
    }

    /// Append a flow node and fill it through `init`
    pub fn nest(&mut self, node: AppletNode, init: impl FnOnce(&mut FlowBuilder<'_>)) -> NodeId {
        let id = self.tree.add(self.flow, node);
        init(&mut FlowBuilder {
            tree: &mut *self.tree,
            flow: id,
        });
        id
    }

    pub fn when(&mut self, events: &[EventType]) -> NodeId {
        self.nest(AppletNode::flow(FlowKind::When), |w| {
            for event in events {
                w.add(AppletNode::new(
                    AppletId(ids::EVENT_BASE + event.code() as u32),
                    NodeKind::Event,
                ));
            }
        })
    }

    pub fn if_(&mut self, init: impl FnOnce(&mut FlowBuilder<'_>)) -> NodeId {
        self.nest(AppletNode::flow(FlowKind::If), init)
    }

    pub fn else_if(&mut self, init: impl FnOnce(&mut FlowBuilder<'_>)) -> NodeId {
        self.nest(AppletNode::flow(FlowKind::ElseIf), init)
    }

    pub fn then(&mut self, init: impl FnOnce(&mut FlowBuilder<'_>)) -> NodeId {
        self.nest(AppletNode::flow(FlowKind::Do), init)
    }

    pub fn repeat(
        &mut self,
        count: impl Into<Value>,
        init: impl FnOnce(&mut FlowBuilder<'_>),
    ) -> NodeId {
        self.nest(AppletNode::flow(FlowKind::Repeat).with_value(count), init)
    }

    pub fn break_loop(&mut self) -> NodeId {
        self.add(AppletNode::flow(FlowKind::Break))
    }

    pub fn group(&mut self, relation: Relation, init: impl FnOnce(&mut FlowBuilder<'_>)) -> NodeId {
        self.nest(AppletNode::flow(FlowKind::Plain).with_relation(relation), init)
    }

    pub fn wait_for(&mut self, init: impl FnOnce(&mut FlowBuilder<'_>)) -> NodeId {
        self.nest(AppletNode::flow(FlowKind::WaitFor), init)
    }

    pub fn criterion(&mut self, id: AppletId, expected: impl Into<Value>) -> NodeId {
        self.add(AppletNode::new(id, NodeKind::Criterion).with_value(expected))
    }

    pub fn action(&mut self, id: AppletId) -> NodeId {
        self.add(AppletNode::new(id, NodeKind::Action))
    }
}
