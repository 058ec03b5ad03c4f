use crate::event::Event;
use crate::hash::{Hash, NodeId, Timestamp};
use crate::window::EventWindow;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const RUNNING_HASH_DOMAIN: &[u8] = b"hashweave/running-event-hash/v1";
const LEGACY_RUNNING_HASH_DOMAIN: &[u8] = b"hashweave/running-event-hash/legacy";
const SNAPSHOT_DOMAIN: &[u8] = b"hashweave/consensus-snapshot/v1";

/// An event together with the values consensus assigned to it.
#[derive(Debug, Clone)]
pub struct ConsensusEvent {
    pub event: Arc<Event>,
    pub round_received: u64,
    /// Position in the global order, starting at zero. Never reassigned.
    pub consensus_order: u64,
    pub consensus_timestamp: Timestamp,
}

/// Minimal data needed to resume consensus from a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub round: u64,
    pub judges: Vec<Hash>,
    pub next_consensus_order: u64,
    pub consensus_timestamp: Timestamp,
    pub minimum_judge_generation: u64,
    /// Transactions in the last consensus event, which sets the minimum step
    /// to the next consensus timestamp.
    pub last_transaction_count: u64,
    /// Latest consensus timestamp of each creator, ordered by node id.
    pub creator_timestamps: Vec<(NodeId, Timestamp)>,
}

impl ConsensusSnapshot {
    /// Commits to every field, so the snapshot can be bound to a state hash.
    pub fn digest(&self) -> Hash {
        let mut bytes = Vec::with_capacity(48 + 32 * self.judges.len() + 16 * self.creator_timestamps.len());
        bytes.extend_from_slice(&self.round.to_be_bytes());
        bytes.extend_from_slice(&self.next_consensus_order.to_be_bytes());
        bytes.extend_from_slice(&self.consensus_timestamp.as_nanos().to_be_bytes());
        bytes.extend_from_slice(&self.minimum_judge_generation.to_be_bytes());
        bytes.extend_from_slice(&self.last_transaction_count.to_be_bytes());
        bytes.extend_from_slice(&(self.judges.len() as u64).to_be_bytes());
        for judge in &self.judges {
            bytes.extend_from_slice(judge.as_bytes());
        }
        for (creator, timestamp) in &self.creator_timestamps {
            bytes.extend_from_slice(&creator.0.to_be_bytes());
            bytes.extend_from_slice(&timestamp.as_nanos().to_be_bytes());
        }
        Hash::digest_parts(SNAPSHOT_DOMAIN, &[&bytes])
    }
}

/// Hash chain over the hashes of all consensus events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunningEventHash {
    pub current: Hash,
    pub legacy: Hash,
}

impl RunningEventHash {
    pub fn absorb(&mut self, event_hash: &Hash) {
        self.current = Hash::digest_parts(
            RUNNING_HASH_DOMAIN,
            &[&self.current.as_bytes()[..], &event_hash.as_bytes()[..]],
        );
        self.legacy = Hash::digest_parts(
            LEGACY_RUNNING_HASH_DOMAIN,
            &[&self.legacy.as_bytes()[..], &event_hash.as_bytes()[..]],
        );
    }
}

/// Events that reached consensus together, in consensus order.
#[derive(Debug, Clone)]
pub struct ConsensusRound {
    pub round: u64,
    pub events: Vec<ConsensusEvent>,
    /// Hashes of the famous witnesses of `round`, ordered by creator.
    pub judges: Vec<Hash>,
    pub snapshot: ConsensusSnapshot,
    /// Window in effect after this round was applied.
    pub event_window: EventWindow,
    /// Running hash after the last event of this round.
    pub running_event_hash: RunningEventHash,
    /// Number of consensus events since genesis, this round included.
    pub consensus_event_count: u64,
}

impl ConsensusRound {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.events
            .last()
            .map(|e| e.consensus_timestamp)
            .unwrap_or(self.snapshot.consensus_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_hash_depends_on_order() {
        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");
        let mut first = RunningEventHash::default();
        first.absorb(&a);
        first.absorb(&b);
        let mut second = RunningEventHash::default();
        second.absorb(&b);
        second.absorb(&a);
        assert_ne!(first.current, second.current);
        assert_ne!(first.current, first.legacy);
    }

    #[test]
    fn snapshot_digest_covers_creator_timestamps() {
        let snapshot = ConsensusSnapshot {
            round: 9,
            judges: vec![Hash::digest(b"judge")],
            next_consensus_order: 40,
            consensus_timestamp: Timestamp::from_millis(900),
            minimum_judge_generation: 12,
            last_transaction_count: 2,
            creator_timestamps: vec![(NodeId(0), Timestamp::from_millis(850))],
        };
        let mut moved = snapshot.clone();
        moved.creator_timestamps[0].1 = Timestamp::from_millis(851);
        assert_eq!(snapshot.digest(), snapshot.clone().digest());
        assert_ne!(snapshot.digest(), moved.digest());
    }
}
