use hashweave_types::Hash;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state tree is empty")]
    EmptyTree,

    #[error("node index {0} does not exist")]
    UnknownNode(usize),

    #[error("node {0} is not a leaf")]
    NotALeaf(usize),

    #[error("payload node {0} is not reachable from the root")]
    PayloadNotInTree(usize),

    #[error("a state proof needs at least one {0}")]
    EmptyProof(&'static str),

    #[error("state proof root {actual} does not match expected {expected}")]
    RootMismatch { expected: Hash, actual: Hash },

    #[error("signed state for round {round} has hash {actual}, expected {expected}")]
    StateHashMismatch { round: u64, expected: Hash, actual: Hash },

    #[error("signed state for round {0} is not complete")]
    Incomplete(u64),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;
