//! Read-only membership table: node id to signing key and consensus weight.

use crate::hash::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressBookError {
    #[error("address book is empty")]
    Empty,
    #[error("node {0} listed more than once")]
    DuplicateNode(NodeId),
    #[error("total weight is zero")]
    ZeroTotalWeight,
}

/// Fraction of total weight required for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    /// More than one half.
    Majority,
    /// More than two thirds.
    SuperMajority,
    /// At least one third.
    StrongMinority,
}

impl Threshold {
    pub fn is_satisfied_by(&self, part: u64, total: u64) -> bool {
        let (part, total) = (part as u128, total as u128);
        match self {
            Threshold::Majority => part * 2 > total,
            Threshold::SuperMajority => part * 3 > total * 2,
            Threshold::StrongMinority => part * 3 >= total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub node_id: NodeId,
    pub weight: u64,
    /// Ed25519 verifying key.
    pub public_key: [u8; 32],
    /// `host:port` used for gossip connections.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBook {
    members: BTreeMap<NodeId, Address>,
    total_weight: u64,
}

impl AddressBook {
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Result<Self, AddressBookError> {
        let mut members = BTreeMap::new();
        for address in addresses {
            let id = address.node_id;
            if members.insert(id, address).is_some() {
                return Err(AddressBookError::DuplicateNode(id));
            }
        }
        if members.is_empty() {
            return Err(AddressBookError::Empty);
        }
        let total_weight = members.values().map(|a| a.weight).sum();
        if total_weight == 0 {
            return Err(AddressBookError::ZeroTotalWeight);
        }
        Ok(Self {
            members,
            total_weight,
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn get(&self, node_id: NodeId) -> Option<&Address> {
        self.members.get(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.members.contains_key(&node_id)
    }

    /// Weight of a member, zero for unknown nodes.
    pub fn weight(&self, node_id: NodeId) -> u64 {
        self.members.get(&node_id).map(|a| a.weight).unwrap_or(0)
    }

    /// Dense index of a member, in ascending node id order.
    pub fn index_of(&self, node_id: NodeId) -> Option<usize> {
        self.members.keys().position(|id| *id == node_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.members.values()
    }

    pub fn is_supermajority(&self, weight: u64) -> bool {
        Threshold::SuperMajority.is_satisfied_by(weight, self.total_weight)
    }
}
