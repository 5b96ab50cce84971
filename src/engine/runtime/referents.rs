// SPDX-License-Identifier: MIT

//! Name-keyed value passing between applets of one run

use super::TaskRuntime;
use crate::engine::applet::{AppletNode, NodeId, Value};
use crate::engine::error::EngineError;
use std::collections::BTreeMap;

impl TaskRuntime {
    /// Bind every referent of `node` to the value in the matching result slot
    ///
    /// A name is bound once per run. Only its original producer may bind it
    /// again, which is what happens when a node runs inside a `Repeat`.
    pub fn register(
        &mut self,
        producer: NodeId,
        node: &AppletNode,
        returned: &[Value],
    ) -> Result<(), EngineError> {
        for (slot, name) in &node.referents {
            let value = returned
                .get(*slot as usize)
                .ok_or(EngineError::MissingReferentSlot {
                    node: producer,
                    slot: *slot,
                })?;
            if let Some((bound_by, _)) = self.referents.get(name) {
                if *bound_by != producer {
                    return Err(EngineError::ReferentRewritten {
                        name: name.clone(),
                        bound_by: *bound_by,
                        node: producer,
                    });
                }
            }
            log::debug!("{} binds '{}' = {}", producer, name, value);
            self.referents
                .insert(name.clone(), (producer, value.clone()));
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str, consumer: NodeId) -> Result<&Value, EngineError> {
        self.referents
            .get(name)
            .map(|(_, value)| value)
            .ok_or_else(|| EngineError::UnresolvedReference {
                name: name.to_string(),
                node: consumer,
            })
    }

    /// Resolve all references of `node`, keyed by argument slot
    pub fn resolve_args(
        &self,
        consumer: NodeId,
        node: &AppletNode,
    ) -> Result<BTreeMap<u8, Value>, EngineError> {
        node.references
            .iter()
            .map(|(slot, name)| Ok((*slot, self.resolve(name, consumer)?.clone())))
            .collect()
    }

    pub fn referent(&self, name: &str) -> Option<&Value> {
        self.referents.get(name).map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::applet::{AppletId, NodeKind};

    fn producer(name: &str) -> AppletNode {
        AppletNode::new(AppletId(0x1000), NodeKind::Action).with_referent(name)
    }

    #[test]
    fn test_register_then_resolve() {
        let mut runtime = TaskRuntime::new();
        runtime
            .register(NodeId(1), &producer("text"), &[Value::from("Login")])
            .unwrap();
        assert_eq!(
            runtime.resolve("text", NodeId(2)).unwrap(),
            &Value::from("Login")
        );

        let consumer = AppletNode::new(AppletId(0x1001), NodeKind::Action).refer_to("text");
        let args = runtime.resolve_args(NodeId(2), &consumer).unwrap();
        assert_eq!(args.get(&0), Some(&Value::from("Login")));
    }

    #[test]
    fn test_unresolved_is_an_error() {
        let runtime = TaskRuntime::new();
        let err = runtime.resolve("missing", NodeId(4)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnresolvedReference { ref name, node } if name == "missing" && node == NodeId(4)
        ));
    }

    #[test]
    fn test_same_producer_may_rebind() {
        let mut runtime = TaskRuntime::new();
        let node = producer("i");
        runtime.register(NodeId(1), &node, &[Value::Int(1)]).unwrap();
        runtime.register(NodeId(1), &node, &[Value::Int(2)]).unwrap();
        assert_eq!(runtime.referent("i"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_other_producer_may_not_rebind() {
        let mut runtime = TaskRuntime::new();
        runtime
            .register(NodeId(1), &producer("i"), &[Value::Int(1)])
            .unwrap();
        let err = runtime
            .register(NodeId(5), &producer("i"), &[Value::Int(2)])
            .unwrap_err();
        assert!(matches!(err, EngineError::ReferentRewritten { bound_by, .. } if bound_by == NodeId(1)));
        assert_eq!(runtime.referent("i"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_missing_slot() {
        let mut runtime = TaskRuntime::new();
        let err = runtime
            .register(NodeId(1), &producer("out"), &[])
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingReferentSlot { slot: 0, .. }));
    }
}
