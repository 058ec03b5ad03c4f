//! Gossiped events and their deterministic two-level hashing.
//!
//! An event hash is computed from a core hash (creator, parents, generation,
//! birth round, creation time) folded together with one hash per transaction.
//! Because only the per-transaction hashes enter the identity, a payload can
//! later be replaced by [`EventTransaction::Redacted`] without changing the
//! event hash or invalidating its signature.

use crate::hash::{Hash, NodeId, Timestamp};
use blake3::Hasher as Blake3;
use serde::{Deserialize, Serialize};
use std::fmt;

const CORE_DOMAIN: &[u8] = b"hashweave/event-core/v1";
const EVENT_DOMAIN: &[u8] = b"hashweave/event/v1";
const APP_TX_DOMAIN: &[u8] = b"hashweave/tx/app";
const SIG_TX_DOMAIN: &[u8] = b"hashweave/tx/state-signature";

/// Generation assigned to an event without any parents.
pub const FIRST_GENERATION: u64 = 0;
/// Birth round used before any round has reached consensus.
pub const GENESIS_ROUND: u64 = 1;

/// Lightweight reference to an event. Retained after the event body has been
/// pruned so descendants can still describe their ancestry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub hash: Hash,
    pub creator: NodeId,
    pub generation: u64,
    pub birth_round: u64,
}

impl EventDescriptor {
    fn write_into(&self, hasher: &mut Blake3) {
        hasher.update(&[1u8]);
        hasher.update(self.hash.as_bytes());
        hasher.update(&self.creator.0.to_be_bytes());
        hasher.update(&self.generation.to_be_bytes());
        hasher.update(&self.birth_round.to_be_bytes());
    }
}

/// A state signature gossiped as a system transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSignatureTransaction {
    pub round: u64,
    pub state_hash: Hash,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// One entry of an event's ordered transaction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTransaction {
    /// Opaque application payload.
    Application {
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },
    /// Signature over a signed state's root hash.
    StateSignature(StateSignatureTransaction),
    /// A payload that has been removed, leaving only its hash.
    Redacted { hash: Hash },
}

impl EventTransaction {
    pub fn application(payload: impl Into<Vec<u8>>) -> Self {
        EventTransaction::Application {
            payload: payload.into(),
        }
    }

    /// Hash of this transaction as it contributes to the event identity.
    pub fn payload_hash(&self) -> Hash {
        match self {
            EventTransaction::Application { payload } => Hash::digest_parts(APP_TX_DOMAIN, &[payload.as_slice()]),
            EventTransaction::StateSignature(sig) => Hash::digest_parts(
                SIG_TX_DOMAIN,
                &[
                    &sig.round.to_be_bytes()[..],
                    &sig.state_hash.as_bytes()[..],
                    sig.signature.as_slice(),
                ],
            ),
            EventTransaction::Redacted { hash } => *hash,
        }
    }

    /// Replace the payload by its hash.
    pub fn redact(&self) -> Self {
        EventTransaction::Redacted {
            hash: self.payload_hash(),
        }
    }

    pub fn as_state_signature(&self) -> Option<&StateSignatureTransaction> {
        match self {
            EventTransaction::StateSignature(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, EventTransaction::StateSignature(_))
    }
}

/// The hashed and signed portion of an event, exactly as it is put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub creator: NodeId,
    pub self_parent: Option<EventDescriptor>,
    pub other_parent: Option<EventDescriptor>,
    pub generation: u64,
    pub birth_round: u64,
    pub time_created: Timestamp,
    pub transactions: Vec<EventTransaction>,
}

impl UnsignedEvent {
    /// Build an event, deriving its generation from the parents.
    pub fn new(
        creator: NodeId,
        self_parent: Option<EventDescriptor>,
        other_parent: Option<EventDescriptor>,
        birth_round: u64,
        time_created: Timestamp,
        transactions: Vec<EventTransaction>,
    ) -> Self {
        let generation = Self::expected_generation(self_parent.as_ref(), other_parent.as_ref());
        Self {
            creator,
            self_parent,
            other_parent,
            generation,
            birth_round,
            time_created,
            transactions,
        }
    }

    pub fn expected_generation(
        self_parent: Option<&EventDescriptor>,
        other_parent: Option<&EventDescriptor>,
    ) -> u64 {
        self_parent
            .into_iter()
            .chain(other_parent)
            .map(|parent| parent.generation + 1)
            .max()
            .unwrap_or(FIRST_GENERATION)
    }

    /// Hash of the event metadata, excluding transaction bodies.
    pub fn core_hash(&self) -> Hash {
        let mut hasher = Blake3::new();
        hasher.update(CORE_DOMAIN);
        hasher.update(&self.creator.0.to_be_bytes());
        for parent in [&self.self_parent, &self.other_parent] {
            match parent {
                Some(descriptor) => descriptor.write_into(&mut hasher),
                None => {
                    hasher.update(&[0u8]);
                }
            }
        }
        hasher.update(&self.generation.to_be_bytes());
        hasher.update(&self.birth_round.to_be_bytes());
        hasher.update(&self.time_created.0.to_be_bytes());
        Hash::from_hasher(hasher)
    }

    /// Identity hash: the core hash folded with every payload hash.
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = Blake3::new();
        hasher.update(EVENT_DOMAIN);
        hasher.update(self.core_hash().as_bytes());
        hasher.update(&(self.transactions.len() as u64).to_be_bytes());
        for tx in &self.transactions {
            hasher.update(tx.payload_hash().as_bytes());
        }
        Hash::from_hasher(hasher)
    }

    pub fn parents(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.self_parent.iter().chain(self.other_parent.iter())
    }
}

/// An event as received from gossip: not yet hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipEvent {
    pub unsigned: UnsignedEvent,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl GossipEvent {
    pub fn new(unsigned: UnsignedEvent, signature: Vec<u8>) -> Self {
        Self {
            unsigned,
            signature,
        }
    }

    /// Compute the identity hash and promote to an [`Event`].
    pub fn into_hashed(self) -> Event {
        let hash = self.unsigned.compute_hash();
        Event { gossip: self, hash }
    }
}

/// A hashed event. Immutable once past intake.
#[derive(Clone, PartialEq, Eq)]
pub struct Event {
    gossip: GossipEvent,
    hash: Hash,
}

impl Event {
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn creator(&self) -> NodeId {
        self.gossip.unsigned.creator
    }

    pub fn generation(&self) -> u64 {
        self.gossip.unsigned.generation
    }

    pub fn birth_round(&self) -> u64 {
        self.gossip.unsigned.birth_round
    }

    pub fn time_created(&self) -> Timestamp {
        self.gossip.unsigned.time_created
    }

    pub fn self_parent(&self) -> Option<&EventDescriptor> {
        self.gossip.unsigned.self_parent.as_ref()
    }

    pub fn other_parent(&self) -> Option<&EventDescriptor> {
        self.gossip.unsigned.other_parent.as_ref()
    }

    pub fn parents(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.gossip.unsigned.parents()
    }

    pub fn transactions(&self) -> &[EventTransaction] {
        &self.gossip.unsigned.transactions
    }

    pub fn signature(&self) -> &[u8] {
        &self.gossip.signature
    }

    pub fn unsigned(&self) -> &UnsignedEvent {
        &self.gossip.unsigned
    }

    pub fn gossip(&self) -> &GossipEvent {
        &self.gossip
    }

    pub fn descriptor(&self) -> EventDescriptor {
        EventDescriptor {
            hash: self.hash,
            creator: self.creator(),
            generation: self.generation(),
            birth_round: self.birth_round(),
        }
    }

    /// Copy of this event with the transaction at `index` redacted. The
    /// identity hash is unchanged.
    pub fn redacted(&self, index: usize) -> Option<Event> {
        let tx = self.gossip.unsigned.transactions.get(index)?;
        let mut gossip = self.gossip.clone();
        gossip.unsigned.transactions[index] = tx.redact();
        Some(Event {
            gossip,
            hash: self.hash,
        })
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("hash", &self.hash)
            .field("creator", &self.creator())
            .field("generation", &self.generation())
            .field("birth_round", &self.birth_round())
            .finish()
    }
}
