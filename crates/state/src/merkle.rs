//! Arena backed Merkle tree holding the application state.
//!
//! Nodes are appended bottom-up, so an internal node can only reference
//! nodes created before it. A node may be referenced by several parents.

use crate::error::{Result, StateError};
use hashweave_types::Hash;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const LEAF_DOMAIN: &[u8] = b"hashweave/state/leaf";
const INTERNAL_DOMAIN: &[u8] = b"hashweave/state/internal";

pub type NodeIndex = usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MerkleNode {
    Internal { children: Vec<NodeIndex> },
    Leaf {
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },
}

pub fn leaf_hash(payload: &[u8]) -> Hash {
    Hash::digest_parts(LEAF_DOMAIN, &[payload])
}

pub fn internal_hash(children: &[Hash]) -> Hash {
    let parts: Vec<&[u8]> = children.iter().map(|h| &h.as_bytes()[..]).collect();
    Hash::digest_parts(INTERNAL_DOMAIN, &parts)
}

/// Appends nodes and produces a hashed [`StateTree`].
#[derive(Debug, Default)]
pub struct StateTreeBuilder {
    nodes: Vec<MerkleNode>,
}

impl StateTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaf(&mut self, payload: impl Into<Vec<u8>>) -> NodeIndex {
        self.nodes.push(MerkleNode::Leaf {
            payload: payload.into(),
        });
        self.nodes.len() - 1
    }

    pub fn internal(&mut self, children: Vec<NodeIndex>) -> Result<NodeIndex> {
        if let Some(bad) = children.iter().find(|c| **c >= self.nodes.len()) {
            return Err(StateError::UnknownNode(*bad));
        }
        self.nodes.push(MerkleNode::Internal { children });
        Ok(self.nodes.len() - 1)
    }

    pub fn build(self, root: NodeIndex) -> Result<StateTree> {
        StateTree::new(self.nodes, root)
    }
}

/// Serialized form of a [`StateTree`]. Hashes are recomputed on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStateTree {
    nodes: Vec<MerkleNode>,
    root: NodeIndex,
}

impl TryFrom<RawStateTree> for StateTree {
    type Error = StateError;

    fn try_from(raw: RawStateTree) -> Result<Self> {
        StateTree::new(raw.nodes, raw.root)
    }
}

impl From<StateTree> for RawStateTree {
    fn from(tree: StateTree) -> Self {
        RawStateTree {
            nodes: tree.nodes,
            root: tree.root,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStateTree", into = "RawStateTree")]
pub struct StateTree {
    nodes: Vec<MerkleNode>,
    root: NodeIndex,
    hashes: Vec<Hash>,
}

impl StateTree {
    pub fn new(nodes: Vec<MerkleNode>, root: NodeIndex) -> Result<Self> {
        if nodes.is_empty() {
            return Err(StateError::EmptyTree);
        }
        if root >= nodes.len() {
            return Err(StateError::UnknownNode(root));
        }
        for (index, node) in nodes.iter().enumerate() {
            if let MerkleNode::Internal { children } = node {
                if let Some(bad) = children.iter().find(|c| **c >= index) {
                    return Err(StateError::UnknownNode(*bad));
                }
            }
        }
        let hashes = Self::hash_nodes(&nodes, root);
        Ok(Self {
            nodes,
            root,
            hashes,
        })
    }

    /// Balanced tree with `fanout` children per internal node.
    pub fn from_leaves(leaves: Vec<Vec<u8>>, fanout: usize) -> Result<Self> {
        if leaves.is_empty() {
            return Err(StateError::EmptyTree);
        }
        let fanout = fanout.max(2);
        let mut builder = StateTreeBuilder::new();
        let mut level: Vec<NodeIndex> = leaves.into_iter().map(|leaf| builder.leaf(leaf)).collect();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(fanout));
            for chunk in level.chunks(fanout) {
                next.push(builder.internal(chunk.to_vec())?);
            }
            level = next;
        }
        builder.build(level[0])
    }

    /// Post-order hashing with an explicit stack. Each node is hashed once,
    /// however many parents reference it. Unreachable nodes keep the zero hash.
    fn hash_nodes(nodes: &[MerkleNode], root: NodeIndex) -> Vec<Hash> {
        let mut hashes: Vec<Option<Hash>> = vec![None; nodes.len()];
        let mut stack = vec![(root, false)];
        while let Some((index, expanded)) = stack.pop() {
            if hashes[index].is_some() {
                continue;
            }
            match &nodes[index] {
                MerkleNode::Leaf { payload } => hashes[index] = Some(leaf_hash(payload)),
                MerkleNode::Internal { children } if expanded => {
                    let child_hashes: Vec<Hash> = children
                        .iter()
                        .map(|c| hashes[*c].unwrap_or(Hash::ZERO))
                        .collect();
                    hashes[index] = Some(internal_hash(&child_hashes));
                }
                MerkleNode::Internal { children } => {
                    stack.push((index, true));
                    stack.extend(
                        children
                            .iter()
                            .rev()
                            .filter(|c| hashes[**c].is_none())
                            .map(|c| (*c, false)),
                    );
                }
            }
        }
        hashes.into_iter().map(|h| h.unwrap_or(Hash::ZERO)).collect()
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn root_hash(&self) -> Hash {
        self.hashes[self.root]
    }

    pub fn node(&self, index: NodeIndex) -> Option<&MerkleNode> {
        self.nodes.get(index)
    }

    pub fn hash_of(&self, index: NodeIndex) -> Option<Hash> {
        self.hashes.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indices of all leaves reachable from the root, left to right. A
    /// shared node is visited once, at its leftmost position.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            if !visited.insert(index) {
                continue;
            }
            match &self.nodes[index] {
                MerkleNode::Leaf { .. } => out.push(index),
                MerkleNode::Internal { children } => stack.extend(children.iter().rev()),
            }
        }
        out
    }
}
