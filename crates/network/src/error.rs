use hashweave_types::NodeId;
use thiserror::Error;

/// Why a sync stopped before both sides sent their end marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAbort {
    /// The sync ran longer than the configured maximum.
    MaxDuration,
    /// Intake has too many events queued from this peer.
    Backpressure,
    /// The peer sent an abort frame.
    PeerAborted,
}

impl std::fmt::Display for SyncAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncAbort::MaxDuration => f.write_str("maximum sync duration exceeded"),
            SyncAbort::Backpressure => f.write_str("intake backlog too deep"),
            SyncAbort::PeerAborted => f.write_str("peer aborted"),
        }
    }
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(u32),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("unexpected {received} from peer, expected {expected}")]
    UnexpectedMessage {
        expected: &'static str,
        received: String,
    },

    #[error("sync aborted: {0}")]
    SyncAborted(SyncAbort),

    #[error("peer {0} is not in the address book")]
    UnknownPeer(NodeId),

    #[error("reconnect failed: {0}")]
    Reconnect(String),

    #[error("consensus engine unavailable: {0}")]
    Engine(#[from] hashweave_consensus::ConsensusError),

    #[error("state error: {0}")]
    State(#[from] hashweave_state::StateError),

    #[error("operation cancelled")]
    Cancelled,
}

impl NetworkError {
    pub fn unexpected(expected: &'static str, received: impl std::fmt::Debug) -> Self {
        NetworkError::UnexpectedMessage {
            expected,
            received: format!("{received:?}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;
