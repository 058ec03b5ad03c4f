//! Error types for intake and consensus

use hashweave_types::{Hash, NodeId};
use thiserror::Error;

/// Why intake refused an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeRejection {
    #[error("creator {0} is not a member")]
    UnknownCreator(NodeId),

    #[error("generation {actual} does not match parents, expected {expected}")]
    WrongGeneration { expected: u64, actual: u64 },

    #[error("self parent created by {0}, not by the event creator")]
    ForeignSelfParent(NodeId),

    #[error("parent {0} does not match the known event with that hash")]
    ParentMismatch(Hash),

    #[error("invalid signature: {0}")]
    BadSignature(String),

    #[error("event is ancient")]
    Ancient,

    #[error("duplicate event")]
    Duplicate,
}

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("event rejected: {0}")]
    Rejected(#[from] IntakeRejection),

    #[error("event {0} already in the graph")]
    DuplicateEvent(Hash),

    /// A safety invariant of the consensus algorithm does not hold. The node
    /// must halt.
    #[error("consensus invariant violated: {0}")]
    InvariantViolation(String),

    #[error("consensus engine channel closed")]
    ChannelClosed,
}

impl ConsensusError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsensusError::InvariantViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
