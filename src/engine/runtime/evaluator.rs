// SPDX-License-Identifier: MIT

//! Tree-walking interpreter
//!
//! Children of a flow run in index order. Each child's relation says how it
//! joins the running result of the children before it; a child that cannot
//! change that result (AND after a failure, OR after a success) is skipped,
//! which is how flows short-circuit. `If` and `ElseIf` record their outcome
//! for the `ElseIf` that may follow, `Repeat` drives its children N times and
//! `WaitFor` parks the run until the next event batch.

use super::TaskRuntime;
use crate::engine::applet::{
    AppletCall, AppletFactory, AppletNode, AppletResult, AppletTree, Behavior, FlowKind, NodeId,
    NodeKind, Relation, Value,
};
use crate::engine::context::EngineContext;
use crate::engine::error::EngineError;
use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Result of evaluating one node
#[derive(Debug)]
pub enum Outcome {
    Done(AppletResult),
    /// Unwinding towards the `Repeat` with this id
    Break(NodeId),
}

pub struct Evaluator<'a> {
    ctx: &'a EngineContext,
    tree: &'a AppletTree,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a EngineContext, tree: &'a AppletTree) -> Result<Self, EngineError> {
        if !tree.is_finalized() {
            return Err(EngineError::NotFinalized);
        }
        Ok(Self { ctx, tree })
    }

    /// Walk the whole tree and return whether the root flow succeeded
    pub async fn run(&self, rt: &mut TaskRuntime) -> Result<bool, EngineError> {
        let successful = match self.evaluate(self.tree.root(), rt).await? {
            Outcome::Done(result) => {
                let successful = result.is_successful();
                self.ctx.results().recycle(result);
                successful
            }
            Outcome::Break(target) => {
                return Err(EngineError::other(format!(
                    "Break escaped its Repeat ({})",
                    target
                )))
            }
        };
        rt.is_successful = successful;
        Ok(successful)
    }

    pub fn evaluate<'s>(
        &'s self,
        id: NodeId,
        rt: &'s mut TaskRuntime,
    ) -> BoxFuture<'s, Result<Outcome, EngineError>> {
        async move {
            if rt.is_halted() {
                return Err(EngineError::Cancelled);
            }
            let node = self.tree.node(id);
            rt.current_applet = Some(id);
            if let Some(observer) = &rt.observer {
                observer.on_applet_started(id, node);
            }

            let outcome = match node.kind {
                NodeKind::Criterion => self.check(id, node, rt).await?,
                NodeKind::Action => self.perform(id, node, rt).await?,
                NodeKind::Event => Outcome::Done(AppletResult::EMPTY_SUCCESS),
                NodeKind::Flow(kind) => self.flow(id, kind, node, rt).await?,
            };

            if let (Some(observer), Outcome::Done(result)) = (&rt.observer, &outcome) {
                observer.on_applet_terminated(id, node, result);
            }
            Ok(outcome)
        }
        .boxed()
    }

    async fn flow(
        &self,
        id: NodeId,
        kind: FlowKind,
        node: &AppletNode,
        rt: &mut TaskRuntime,
    ) -> Result<Outcome, EngineError> {
        match kind {
            FlowKind::When => Ok(Outcome::Done(AppletResult::EMPTY_SUCCESS)),
            FlowKind::Break => self
                .tree
                .break_target(id)
                .map(Outcome::Break)
                .ok_or_else(|| EngineError::other(format!("{} has no enclosing Repeat", id))),
            FlowKind::Repeat => self.repeat(id, node, rt).await,
            FlowKind::WaitFor => self.wait_for(id, node, rt).await,
            FlowKind::If | FlowKind::ElseIf => {
                let outcome = self.combine(id, rt).await?;
                if let Outcome::Done(result) = &outcome {
                    rt.if_successful = Some(result.is_successful());
                }
                Ok(outcome)
            }
            FlowKind::Root | FlowKind::Do | FlowKind::Plain => self.combine(id, rt).await,
        }
    }

    /// Evaluate the children of `flow` and fold their results
    ///
    /// `If` and `Repeat` always run. A `Do` right after an `If` or `ElseIf`
    /// runs only when that condition held; any other `Do` runs
    /// unconditionally. An `ElseIf` runs only while no branch of its chain
    /// has been taken. Everything else is subject to its relation.
    async fn combine(&self, flow: NodeId, rt: &mut TaskRuntime) -> Result<Outcome, EngineError> {
        let outer = rt.current_flow.replace(flow);
        let mut running: Option<bool> = None;
        // Outcome of the condition sibling just before the current child
        let mut guard: Option<bool> = None;
        // Whether some branch of the current If/ElseIf chain was taken
        let mut chain: Option<bool> = None;

        for &child in self.tree.children(flow) {
            let node = self.tree.node(child);
            let kind = node.kind.flow_kind();
            let relation = match kind {
                Some(FlowKind::ElseIf) => Relation::Or,
                _ => node.relation,
            };
            let skip = match kind {
                Some(FlowKind::When) => true,
                Some(FlowKind::If) | Some(FlowKind::Repeat) => false,
                Some(FlowKind::ElseIf) => chain != Some(false),
                Some(FlowKind::Do) => guard == Some(false),
                _ if node.kind == NodeKind::Event => true,
                _ => matches!(
                    (running, relation),
                    (Some(false), Relation::And) | (Some(true), Relation::Or)
                ),
            };

            let mut held = None;
            if skip {
                log::debug!("Skipping {} (applet {})", child, node.id);
                if let Some(observer) = &rt.observer {
                    observer.on_applet_skipped(child, node);
                }
            } else {
                match self.evaluate(child, rt).await? {
                    Outcome::Break(target) => {
                        rt.current_flow = outer;
                        return Ok(Outcome::Break(target));
                    }
                    Outcome::Done(result) => {
                        let ok = result.is_successful();
                        self.ctx.results().recycle(result);
                        held = Some(ok);
                        running = Some(match (running, relation) {
                            (None, _) => ok,
                            (Some(before), Relation::And) => before && ok,
                            (Some(before), Relation::Or) => before || ok,
                        });
                    }
                }
            }

            match kind {
                Some(FlowKind::If) => {
                    guard = held;
                    chain = held;
                }
                Some(FlowKind::ElseIf) => {
                    guard = Some(held.unwrap_or(false));
                    chain = chain.map(|taken| taken || held.unwrap_or(false));
                }
                Some(FlowKind::Do) if chain.is_some() => guard = None,
                _ => {
                    guard = None;
                    chain = None;
                }
            }
        }

        rt.current_flow = outer;
        Ok(Outcome::Done(AppletResult::empty(running.unwrap_or(true))))
    }

    async fn repeat(
        &self,
        id: NodeId,
        node: &AppletNode,
        rt: &mut TaskRuntime,
    ) -> Result<Outcome, EngineError> {
        let count = match node.references.get(&0) {
            Some(name) => rt.resolve(name, id)?.as_i64(),
            None => node.value.as_ref().and_then(Value::as_i64),
        };
        let count = count
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                EngineError::applet(node.id, id, "Repeat count is not a non-negative integer")
            })?;

        let mut last = true;
        for iteration in 1..=count {
            if rt.is_halted() {
                return Err(EngineError::Cancelled);
            }
            if !node.referents.is_empty() {
                rt.register(id, node, &[Value::Int(iteration as i64)])?;
            }
            match self.combine(id, rt).await? {
                Outcome::Break(target) if target == id => {
                    log::debug!("{} stopped by Break after {} iterations", id, iteration);
                    return Ok(Outcome::Done(AppletResult::EMPTY_SUCCESS));
                }
                Outcome::Break(target) => return Ok(Outcome::Break(target)),
                Outcome::Done(result) => {
                    last = result.is_successful();
                    self.ctx.results().recycle(result);
                }
            }
        }
        Ok(Outcome::Done(AppletResult::empty(last)))
    }

    async fn wait_for(
        &self,
        id: NodeId,
        node: &AppletNode,
        rt: &mut TaskRuntime,
    ) -> Result<Outcome, EngineError> {
        let deadline = node
            .value
            .as_ref()
            .and_then(Value::as_i64)
            .and_then(|ms| u64::try_from(ms).ok())
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        loop {
            match self.combine(id, rt).await? {
                Outcome::Done(result) if result.is_successful() => return Ok(Outcome::Done(result)),
                Outcome::Done(result) => self.ctx.results().recycle(result),
                brk => return Ok(brk),
            }

            let control = rt.control.clone();
            control.suspend(id);
            rt.waiting_for = Some(id);
            log::info!("Run parked at {}", id);

            let batch = tokio::select! {
                biased;
                _ = control.cancelled() => return Err(EngineError::Cancelled),
                events = control.next_batch() => Some(events),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => None,
            };
            rt.waiting_for = None;

            match batch {
                Some(events) => {
                    log::info!("Run resumed at {} with {} event(s)", id, events.len());
                    rt.replace_events(events);
                }
                None => {
                    control.resume_empty();
                    log::info!("{} timed out", id);
                    return Ok(Outcome::Done(AppletResult::EMPTY_FAILURE));
                }
            }
        }
    }

    async fn check(
        &self,
        id: NodeId,
        node: &AppletNode,
        rt: &mut TaskRuntime,
    ) -> Result<Outcome, EngineError> {
        let criterion = match self.ctx.registry().behavior(node.id) {
            Some(Behavior::Criterion(criterion)) => criterion,
            _ => return Err(EngineError::UnknownApplet(node.id)),
        };
        let args = self.prepare(id, node, rt)?;

        let matched = {
            let call = self.call(id, node, &args, rt);
            criterion.check(&call).await
        }
        .map_err(|e| self.thrown(id, node, &*rt, e.to_string()))?;

        if let Some(actual) = &matched.actual {
            rt.update_fingerprint(actual);
        }
        let successful = matched.matched != node.inverted;
        log::debug!(
            "Criterion {} at {}: matched={} inverted={}",
            node.id,
            id,
            matched.matched,
            node.inverted
        );

        let result = if successful {
            let returned: Vec<Value> = matched.actual.into_iter().collect();
            rt.register(id, node, &returned)?;
            self.ctx.results().succeeded(returned)
        } else {
            self.ctx.results().failed(matched.actual)
        };
        Ok(Outcome::Done(result))
    }

    async fn perform(
        &self,
        id: NodeId,
        node: &AppletNode,
        rt: &mut TaskRuntime,
    ) -> Result<Outcome, EngineError> {
        let action = match self.ctx.registry().behavior(node.id) {
            Some(Behavior::Action(action)) => action,
            _ => return Err(EngineError::UnknownApplet(node.id)),
        };
        let args = self.prepare(id, node, rt)?;

        let output = {
            let call = self.call(id, node, &args, rt);
            action.perform(&call).await
        }
        .map_err(|e| self.thrown(id, node, &*rt, e.to_string()))?;

        for value in output.returned.iter().chain(output.actual.iter()) {
            rt.update_fingerprint(value);
        }
        log::debug!(
            "Action {} at {}: successful={}",
            node.id,
            id,
            output.successful
        );

        let result = if output.successful {
            rt.register(id, node, &output.returned)?;
            self.ctx.results().succeeded(output.returned)
        } else {
            self.ctx.results().failed(output.actual)
        };
        Ok(Outcome::Done(result))
    }

    /// Report a collaborator error to the observer and turn it into an engine error
    fn thrown(
        &self,
        id: NodeId,
        node: &AppletNode,
        rt: &TaskRuntime,
        message: String,
    ) -> EngineError {
        if let Some(observer) = &rt.observer {
            let result = self.ctx.results().error(message.clone());
            observer.on_applet_terminated(id, node, &result);
            self.ctx.results().recycle(result);
        }
        EngineError::applet(node.id, id, message)
    }

    /// Resolve arguments and target for a leaf
    fn prepare(
        &self,
        id: NodeId,
        node: &AppletNode,
        rt: &mut TaskRuntime,
    ) -> Result<BTreeMap<u8, Value>, EngineError> {
        let args = rt.resolve_args(id, node)?;
        for value in args.values() {
            rt.update_fingerprint(value);
        }
        rt.target = self
            .ctx
            .target_supplier()
            .and_then(|supplier| supplier.resolve(node, &rt.events));
        Ok(args)
    }

    fn call<'c>(
        &'c self,
        id: NodeId,
        node: &'c AppletNode,
        args: &'c BTreeMap<u8, Value>,
        rt: &'c TaskRuntime,
    ) -> AppletCall<'c> {
        AppletCall {
            node_id: id,
            node,
            args,
            target: rt.target.as_ref(),
            events: &rt.events,
            globals: self.ctx.globals(),
            task_checksum: rt.task_checksum(),
        }
    }
}
