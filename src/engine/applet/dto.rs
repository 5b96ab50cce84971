// SPDX-License-Identifier: MIT

//! Persisted tree shape
//!
//! A tree persists as its nodes in depth-first, index order, each entry
//! carrying its child count. Node kinds are not stored: they are recovered
//! from the applet id through an `AppletFactory`.

use super::{AppletFactory, AppletId, AppletTree, NodeId, Relation, Value};
use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppletDto {
    pub id: AppletId,
    #[serde(default, skip_serializing_if = "is_and")]
    pub relation: Relation,
    #[serde(default, skip_serializing_if = "is_false")]
    pub inverted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<u8, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub referents: BTreeMap<u8, String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub children: u32,
}

fn is_and(relation: &Relation) -> bool {
    *relation == Relation::And
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeDto {
    pub nodes: Vec<AppletDto>,
}

impl TreeDto {
    pub fn from_tree(tree: &AppletTree) -> Self {
        let nodes = tree
            .preorder()
            .into_iter()
            .map(|id| {
                let node = tree.node(id);
                AppletDto {
                    id: node.id,
                    relation: node.relation,
                    inverted: node.inverted,
                    value: node.value.clone(),
                    references: node.references.clone(),
                    referents: node.referents.clone(),
                    children: node.children().len() as u32,
                }
            })
            .collect();
        Self { nodes }
    }

    /// Rebuild the tree; the result still has to be finalized
    pub fn into_tree(self, factory: &dyn AppletFactory) -> Result<AppletTree, EngineError> {
        let mut entries = self.nodes.into_iter();
        let root_dto = entries
            .next()
            .ok_or_else(|| EngineError::other("Persisted tree has no root"))?;
        let mut tree = AppletTree::new();
        let root = tree.root();
        if factory.create(root_dto.id).map(|n| n.kind) != Some(tree.node(root).kind) {
            return Err(EngineError::other(format!(
                "Persisted tree starts with {} instead of a root flow",
                root_dto.id
            )));
        }

        // (parent, children still expected)
        let mut stack: Vec<(NodeId, u32)> = Vec::new();
        let root_children = root_dto.children;
        apply(tree.node_mut(root), root_dto);
        if root_children > 0 {
            stack.push((root, root_children));
        }

        for dto in entries {
            let (parent, remaining) = stack
                .last_mut()
                .ok_or_else(|| EngineError::other("Persisted tree has trailing nodes"))?;
            let parent = *parent;
            *remaining -= 1;
            if *remaining == 0 {
                stack.pop();
            }

            let mut node = factory
                .create(dto.id)
                .ok_or(EngineError::UnknownApplet(dto.id))?;
            let children = dto.children;
            apply(&mut node, dto);
            let id = tree.add(parent, node);
            if children > 0 {
                stack.push((id, children));
            }
        }

        if !stack.is_empty() {
            return Err(EngineError::other("Persisted tree is truncated"));
        }
        Ok(tree)
    }

    /// Stable bytes for hashing: field order is fixed by the struct and maps are ordered
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, EngineError> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn apply(node: &mut super::AppletNode, dto: AppletDto) {
    node.relation = dto.relation;
    node.inverted = dto.inverted;
    node.value = dto.value;
    node.references = dto.references;
    node.referents = dto.referents;
}

impl AppletTree {
    pub fn to_dto(&self) -> TreeDto {
        TreeDto::from_tree(self)
    }

    /// SHA-256 of the canonical persisted shape
    pub fn digest(&self) -> Result<[u8; 32], EngineError> {
        let bytes = self.to_dto().canonical_bytes()?;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(&bytes));
        Ok(digest)
    }
}

/// First eight bytes of a digest, big-endian
pub fn truncate_digest(digest: &[u8]) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}
