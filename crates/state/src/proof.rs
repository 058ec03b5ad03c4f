//! State proofs: the part of a state tree needed to recompute its root from
//! a set of payloads, together with the signatures that make the root
//! trustworthy.
//!
//! Proof nodes are stored flat. Children always precede their parent, and
//! the last node is the root, so the root hash can be recomputed in a single
//! forward pass without recursion.

use crate::error::{Result, StateError};
use crate::merkle::{internal_hash, leaf_hash, MerkleNode, NodeIndex, StateTree};
use bincode::Options;
use hashweave_crypto::{verify_hash_signature, SignatureVerifier};
use hashweave_types::{AddressBook, Hash, NodeId, Threshold};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Upper bound on the encoded size of a proof accepted from the wire.
pub const MAX_PROOF_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateProofNode {
    /// Children are indices of earlier proof nodes.
    Internal { children: Vec<usize> },
    /// A payload being proven.
    Payload {
        #[serde(with = "serde_bytes")]
        bytes: Vec<u8>,
    },
    /// A subtree not needed for the proof, represented by its hash.
    Opaque { hash: Hash },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSignature {
    pub node_id: NodeId,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateProof {
    nodes: Vec<StateProofNode>,
    signatures: Vec<NodeSignature>,
}

impl StateProof {
    /// Build a proof for the leaves at `payloads`.
    ///
    /// Only ancestors of the requested leaves are expanded; every other child
    /// of an expanded node becomes an opaque hash. A node reachable along
    /// several paths is emitted once and shared.
    pub fn build(
        tree: &StateTree,
        signatures: &BTreeMap<NodeId, Vec<u8>>,
        payloads: &[NodeIndex],
    ) -> Result<Self> {
        if payloads.is_empty() {
            return Err(StateError::EmptyProof("payload"));
        }
        if signatures.is_empty() {
            return Err(StateError::EmptyProof("signature"));
        }
        let reachable = tree.leaves().into_iter().collect::<HashSet<_>>();
        for &index in payloads {
            match tree.node(index) {
                None => return Err(StateError::UnknownNode(index)),
                Some(MerkleNode::Internal { .. }) => return Err(StateError::NotALeaf(index)),
                Some(MerkleNode::Leaf { .. }) if !reachable.contains(&index) => {
                    return Err(StateError::PayloadNotInTree(index))
                }
                Some(MerkleNode::Leaf { .. }) => {}
            }
        }

        let relevant = Self::ancestors_of(tree, payloads);
        let targets: HashSet<NodeIndex> = payloads.iter().copied().collect();
        let mut nodes = Vec::new();
        // Tree index to proof index. Doubles as the visited set.
        let mut built: HashMap<NodeIndex, usize> = HashMap::new();
        let mut stack = vec![(tree.root(), false)];

        while let Some((index, expanded)) = stack.pop() {
            if built.contains_key(&index) {
                continue;
            }
            let node = tree.node(index).ok_or(StateError::UnknownNode(index))?;
            let proof_node = match node {
                MerkleNode::Leaf { payload } if targets.contains(&index) => StateProofNode::Payload {
                    bytes: payload.clone(),
                },
                MerkleNode::Internal { children } if relevant.contains(&index) => {
                    if !expanded {
                        stack.push((index, true));
                        stack.extend(
                            children
                                .iter()
                                .rev()
                                .filter(|c| !built.contains_key(*c))
                                .map(|c| (*c, false)),
                        );
                        continue;
                    }
                    let children = children
                        .iter()
                        .map(|c| built.get(c).copied().ok_or(StateError::UnknownNode(*c)))
                        .collect::<Result<Vec<_>>>()?;
                    StateProofNode::Internal { children }
                }
                _ => StateProofNode::Opaque {
                    hash: tree.hash_of(index).ok_or(StateError::UnknownNode(index))?,
                },
            };
            nodes.push(proof_node);
            built.insert(index, nodes.len() - 1);
        }

        let signatures = signatures
            .iter()
            .map(|(node_id, signature)| NodeSignature {
                node_id: *node_id,
                signature: signature.clone(),
            })
            .collect();
        Ok(Self { nodes, signatures })
    }

    /// Internal nodes with at least one requested leaf below them.
    fn ancestors_of(tree: &StateTree, payloads: &[NodeIndex]) -> HashSet<NodeIndex> {
        let mut parents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for index in 0..tree.len() {
            if let Some(MerkleNode::Internal { children }) = tree.node(index) {
                for child in children {
                    parents.entry(*child).or_default().push(index);
                }
            }
        }
        let mut relevant = HashSet::new();
        let mut pending: Vec<NodeIndex> = payloads.to_vec();
        while let Some(index) = pending.pop() {
            for parent in parents.get(&index).into_iter().flatten() {
                if relevant.insert(*parent) {
                    pending.push(*parent);
                }
            }
        }
        relevant
    }

    pub fn nodes(&self) -> &[StateProofNode] {
        &self.nodes
    }

    pub fn signatures(&self) -> &[NodeSignature] {
        &self.signatures
    }

    /// Proven payloads in tree order.
    pub fn payloads(&self) -> Vec<&[u8]> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                StateProofNode::Payload { bytes } => Some(bytes.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Recompute the root hash from the proof tree.
    pub fn root_hash(&self) -> Result<Hash> {
        if self.nodes.is_empty() {
            return Err(StateError::EmptyProof("node"));
        }
        let mut hashes: Vec<Hash> = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            let hash = match node {
                StateProofNode::Payload { bytes } => leaf_hash(bytes),
                StateProofNode::Opaque { hash } => *hash,
                StateProofNode::Internal { children } => {
                    let child_hashes = children
                        .iter()
                        .map(|c| {
                            if *c < index {
                                Ok(hashes[*c])
                            } else {
                                Err(StateError::UnknownNode(*c))
                            }
                        })
                        .collect::<Result<Vec<_>>>()?;
                    internal_hash(&child_hashes)
                }
            };
            hashes.push(hash);
        }
        Ok(hashes[hashes.len() - 1])
    }

    pub fn verify_root(&self, expected: &Hash) -> Result<()> {
        let actual = self.root_hash()?;
        if actual != *expected {
            return Err(StateError::RootMismatch {
                expected: *expected,
                actual,
            });
        }
        Ok(())
    }

    fn has_duplicate_signer(&self) -> bool {
        let mut seen = HashSet::new();
        self.signatures.iter().any(|s| !seen.insert(s.node_id))
    }

    /// Weight of the distinct members whose signature over the proof root is
    /// valid. Unknown, zero weight and invalid signers contribute nothing.
    pub fn effective_weight(&self, verifier: &dyn SignatureVerifier, book: &AddressBook) -> Result<u64> {
        let root = self.root_hash()?;
        let mut counted = HashSet::new();
        let mut weight = 0u64;
        for entry in &self.signatures {
            let member_weight = book.weight(entry.node_id);
            if member_weight == 0 || counted.contains(&entry.node_id) {
                continue;
            }
            match verify_hash_signature(verifier, book, entry.node_id, &root, &entry.signature) {
                Ok(()) => {
                    counted.insert(entry.node_id);
                    weight = weight.saturating_add(member_weight);
                }
                Err(err) => {
                    debug!(target = "state_proof", node = %entry.node_id, error = %err, "ignoring signature");
                }
            }
        }
        Ok(weight)
    }

    /// A proof listing the same signer twice is rejected outright.
    pub fn is_valid_with(
        &self,
        verifier: &dyn SignatureVerifier,
        book: &AddressBook,
        threshold: Threshold,
    ) -> Result<bool> {
        if self.has_duplicate_signer() {
            debug!(target = "state_proof", "rejecting proof with duplicate signer");
            return Ok(false);
        }
        let weight = self.effective_weight(verifier, book)?;
        Ok(threshold.is_satisfied_by(weight, book.total_weight()))
    }

    pub fn is_valid(&self, verifier: &dyn SignatureVerifier, book: &AddressBook) -> Result<bool> {
        self.is_valid_with(verifier, book, Threshold::SuperMajority)
    }

    fn codec() -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_limit(MAX_PROOF_BYTES)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(Self::codec().serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::codec().deserialize(bytes)?)
    }
}
